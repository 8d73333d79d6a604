//! Atomic persistence of the journal document to `BEAKERLIB_JOURNAL`.

use std::io;
use std::path::Path;

use crate::xml::Element;

/// Write `doc`'s compact serialisation to `path`, atomically: write to a
/// sibling temp file on the same filesystem, then rename over the target.
/// A concurrent reader of `path` never observes a partial write.
pub fn save(doc: &Element, path: &Path) -> io::Result<()> {
    let bytes = doc.to_xml_string(false).into_bytes();

    let tmp_path = tmp_path_for(path);
    std::fs::write(&tmp_path, &bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "journal.xml".to_string());
    let tmp_name = format!(".{file_name}.{}.tmp", std::process::id());
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(tmp_name),
        _ => std::path::PathBuf::from(tmp_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_document;

    #[test]
    fn save_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.xml");

        let mut doc = Element::new("BEAKER_TEST");
        doc.push_child(Element::new("package").with_text("foo"));

        save(&doc, &path).unwrap();
        let bytes = std::fs::read_to_string(&path).unwrap();
        let reloaded = parse_document(&bytes).unwrap();
        assert_eq!(reloaded.to_xml_string(false), doc.to_xml_string(false));
    }

    #[test]
    fn save_does_not_leave_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.xml");
        let doc = Element::new("BEAKER_TEST");
        save(&doc, &path).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
