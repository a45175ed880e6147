use std::io::{Cursor, Write};

use anyhow::{Context, Result};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::rewrite::RewrittenModule;
use crate::scan::MANIFEST_PATH;

/// Package a rewritten module as a jar: manifest, then the entry class, then every other
/// class in name order. Timestamps are pinned so identical input yields identical bytes.
pub(crate) fn build_jar(module: &RewrittenModule) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::default());
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    let (entry_name, entry_bytes) = &module.entry_class;
    write_entry(&mut writer, MANIFEST_PATH, manifest(entry_name).as_bytes(), options)?;
    write_entry(&mut writer, &class_path(entry_name), entry_bytes, options)?;
    for (name, bytes) in &module.classes {
        write_entry(&mut writer, &class_path(name), bytes, options)?;
    }

    let cursor = writer.finish().context("failed to finish jar")?;
    Ok(cursor.into_inner())
}

fn write_entry(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: &str,
    data: &[u8],
    options: SimpleFileOptions,
) -> Result<()> {
    writer
        .start_file(name, options)
        .with_context(|| format!("failed to add {name}"))?;
    writer
        .write_all(data)
        .with_context(|| format!("failed to write {name}"))
}

fn manifest(entry_class: &str) -> String {
    format!(
        "Manifest-Version: 1.0\r\nMain-Class: {}\r\n\r\n",
        entry_class.replace('/', ".")
    )
}

fn class_path(name: &str) -> String {
    format!("{name}.class")
}
