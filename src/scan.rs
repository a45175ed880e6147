use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jclassfile::class_file;
use tracing::debug;
use zip::ZipArchive;

use crate::engine::ModuleInput;
use crate::ir::internal_name;
use crate::pool::PoolView;

pub(crate) const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// Module read from disk plus bookkeeping for the timing line.
pub(crate) struct ScanOutput {
    pub(crate) module: ModuleInput,
    pub(crate) skipped_entries: usize,
}

/// Read a module from a `.jar`, a directory of `.class` files or a single `.class` file.
///
/// `main_class` overrides the jar manifest; a directory or class file needs it unless the
/// module holds exactly one class.
pub(crate) fn scan_module(input: &Path, main_class: Option<&str>) -> Result<ScanOutput> {
    let mut classes = BTreeMap::new();
    let mut skipped_entries = 0;
    let mut manifest_main = None;

    if input.is_dir() {
        for path in class_files_under(input)? {
            let data = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            insert_class(&mut classes, data, &path.to_string_lossy())?;
        }
    } else {
        let extension = input.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        match extension {
            "class" => {
                let data =
                    fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
                insert_class(&mut classes, data, &input.to_string_lossy())?;
            }
            "jar" => {
                let file = fs::File::open(input)
                    .with_context(|| format!("failed to open {}", input.display()))?;
                let jar = read_jar(file, &input.to_string_lossy())?;
                classes = jar.classes;
                skipped_entries = jar.skipped_entries;
                manifest_main = jar.main_class;
            }
            _ => anyhow::bail!("unsupported input file: {}", input.display()),
        }
    }

    let entry_class = match (main_class, manifest_main) {
        (Some(name), _) => internal_name(name),
        (None, Some(name)) => name,
        (None, None) if classes.len() == 1 => classes.keys().next().cloned().unwrap_or_default(),
        (None, None) => anyhow::bail!(
            "no entry class for {}: pass --main-class or a jar with Main-Class",
            input.display()
        ),
    };
    if !classes.contains_key(&entry_class) {
        anyhow::bail!("entry class {entry_class} not found in {}", input.display());
    }

    Ok(ScanOutput {
        module: ModuleInput {
            entry_class,
            classes,
        },
        skipped_entries,
    })
}

struct JarContents {
    classes: BTreeMap<String, Vec<u8>>,
    main_class: Option<String>,
    skipped_entries: usize,
}

fn read_jar<R: Read + Seek>(reader: R, label: &str) -> Result<JarContents> {
    let mut archive = ZipArchive::new(reader).with_context(|| format!("failed to read {label}"))?;

    let mut entry_names = Vec::new();
    let mut skipped_entries = 0;
    let mut has_manifest = false;
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {label}"))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name == MANIFEST_PATH {
            has_manifest = true;
        } else if name.ends_with(".class") && !name.ends_with("module-info.class") {
            entry_names.push(name);
        } else {
            debug!(entry = %name, "dropping non-class jar entry");
            skipped_entries += 1;
        }
    }

    entry_names.sort();

    let mut classes = BTreeMap::new();
    for name in entry_names {
        let data = read_entry(&mut archive, &name, label)?;
        insert_class(&mut classes, data, &format!("{label}:{name}"))?;
    }

    let main_class = if has_manifest {
        let data = read_entry(&mut archive, MANIFEST_PATH, label)?;
        manifest_main_class(&String::from_utf8_lossy(&data))
    } else {
        None
    };

    Ok(JarContents {
        classes,
        main_class,
        skipped_entries,
    })
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str, label: &str) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("failed to read {label}:{name}"))?;
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .with_context(|| format!("failed to read {label}:{name}"))?;
    Ok(data)
}

/// Key the class by the name it declares, not by where it was stored.
fn insert_class(classes: &mut BTreeMap<String, Vec<u8>>, data: Vec<u8>, origin: &str) -> Result<()> {
    let class = class_file::parse(&data).with_context(|| format!("failed to parse {origin}"))?;
    let name = PoolView::of(&class)
        .this_class_name(&class)
        .with_context(|| format!("failed to read the class name of {origin}"))?
        .to_string();
    if classes.insert(name.clone(), data).is_some() {
        anyhow::bail!("class {name} defined twice (last seen in {origin})");
    }
    Ok(())
}

/// `Main-Class` value of a manifest, honouring 72-byte continuation lines.
pub(crate) fn manifest_main_class(manifest: &str) -> Option<String> {
    let mut logical: Vec<String> = Vec::new();
    for line in manifest.lines() {
        if let (Some(rest), Some(last)) = (line.strip_prefix(' '), logical.last_mut()) {
            last.push_str(rest);
            continue;
        }
        logical.push(line.to_string());
    }
    logical.iter().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "Main-Class")
            .then(|| internal_name(value.trim()))
            .filter(|name| !name.is_empty())
    })
}

fn class_files_under(root: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in
        fs::read_dir(root).with_context(|| format!("failed to read directory {}", root.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry under {}", root.display()))?;
        entries.push(entry.path());
    }

    // Keep deterministic ordering by sorting directory listings.
    entries.sort();

    let mut files = Vec::new();
    for entry in entries {
        if entry.is_dir() {
            files.extend(class_files_under(&entry)?);
        } else if entry.extension().and_then(|ext| ext.to_str()) == Some("class")
            && entry.file_name().and_then(|name| name.to_str()) != Some("module-info.class")
        {
            files.push(entry);
        }
    }
    Ok(files)
}
