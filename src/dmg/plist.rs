//! Minimal scan of the UDIF XML manifest.
//!
//! We only need the `blkx` array: one `<dict>` per partition carrying a name
//! and a base64 `mish` block table.  Plain byte search is enough for that.

use crate::error::{Error, Result};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use memchr::memmem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlkxEntry {
    pub name: String,
    /// Decoded `mish` table bytes
    pub data: Vec<u8>,
}

/// Find `needle` in `hay[from..]`; returns the absolute index.
#[inline]
fn find_from(hay: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    memmem::find(hay.get(from..)?, needle).map(|i| i + from)
}

/// Text between `<tag>` and `</tag>` following the `<key>name</key>` in `dict`.
fn value_after_key<'a>(dict: &'a [u8], key: &str, tag: &str) -> Option<&'a [u8]> {
    let key_pat = format!("<key>{key}</key>");
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let k = memmem::find(dict, key_pat.as_bytes())? + key_pat.len();
    let start = find_from(dict, open.as_bytes(), k)? + open.len();
    let end = find_from(dict, close.as_bytes(), start)?;
    Some(&dict[start..end])
}

fn unescape(text: &[u8]) -> String {
    String::from_utf8_lossy(text)
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub fn blkx_entries(xml: &[u8]) -> Result<Vec<BlkxEntry>> {
    let blkx = memmem::find(xml, b"<key>blkx</key>")
        .ok_or_else(|| Error::Manifest("no blkx key".into()))?;
    let array_start = find_from(xml, b"<array>", blkx)
        .ok_or_else(|| Error::Manifest("blkx key without an array".into()))?;
    let array_end = find_from(xml, b"</array>", array_start)
        .ok_or_else(|| Error::Manifest("unterminated blkx array".into()))?;
    let array = &xml[array_start..array_end];

    let mut entries = Vec::new();
    let mut pos = 0;
    while let Some(open) = find_from(array, b"<dict>", pos) {
        let close = find_from(array, b"</dict>", open)
            .ok_or_else(|| Error::Manifest("unterminated blkx dict".into()))?;
        let dict = &array[open..close];
        pos = close;

        let name = value_after_key(dict, "CFName", "string")
            .or_else(|| value_after_key(dict, "Name", "string"))
            .map(unescape)
            .unwrap_or_default();

        let Some(b64) = value_after_key(dict, "Data", "data") else {
            log::warn!("blkx entry {:?} has no Data, skipped", name);
            continue;
        };

        let compact: Vec<u8> = b64.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
        let data = STANDARD.decode(&compact)
            .map_err(|e| Error::Manifest(format!("blkx entry {name:?}: bad base64: {e}")))?;

        entries.push(BlkxEntry { name, data });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
	<key>resource-fork</key>
	<dict>
		<key>blkx</key>
		<array>
			<dict>
				<key>Attributes</key>
				<string>0x0050</string>
				<key>CFName</key>
				<string>Protective Master Boot Record (MBR : 0)</string>
				<key>Data</key>
				<data>
				bWlzaA==
				</data>
				<key>ID</key>
				<string>-1</string>
				<key>Name</key>
				<string>Protective Master Boot Record (MBR : 0)</string>
			</dict>
			<dict>
				<key>Data</key>
				<data>
				AAEC
				Aw==
				</data>
				<key>Name</key>
				<string>disk image (Apple_APFS : 4) &amp; more</string>
			</dict>
		</array>
	</dict>
</dict>
</plist>
"#;

    #[test]
    fn test_blkx_entries() {
        let entries = blkx_entries(MANIFEST.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].name, "Protective Master Boot Record (MBR : 0)");
        assert_eq!(entries[0].data, b"mish");

        assert_eq!(entries[1].name, "disk image (Apple_APFS : 4) & more");
        assert_eq!(entries[1].data, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_missing_blkx() {
        let err = blkx_entries(b"<plist><dict></dict></plist>").unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));
    }

    #[test]
    fn test_bad_base64() {
        let xml = b"<key>blkx</key><array><dict><key>Name</key><string>x</string>\
                    <key>Data</key><data>!!!</data></dict></array>";
        assert!(matches!(blkx_entries(xml), Err(Error::Manifest(_))));
    }
}
