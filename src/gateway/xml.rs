//! Shared reader for the flat XML documents the cloud APIs return
//! (S3 `ListObjectsV2`, Azure `EnumerationResults`, STS
//! `AssumeRoleWithWebIdentity`).
//!
//! These schemas are shallow: a handful of repeated record elements plus
//! top-level scalars. The reader collects both, keyed by element name,
//! with entities unescaped so keys like `a&amp;b` come back as `a&b`.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

#[derive(Debug, Default)]
pub(crate) struct XmlDocument {
    scalars: HashMap<String, String>,
    blocks: HashMap<String, Vec<HashMap<String, String>>>,
}

impl XmlDocument {
    /// Read a document, treating each element named in `block_tags` as a
    /// repeated record whose descendant leaf texts become its fields.
    /// Leaf text outside any record lands in the scalar map. Malformed
    /// trailing input yields whatever parsed cleanly before it.
    pub(crate) fn parse(xml: &str, block_tags: &[&str]) -> Self {
        let mut reader = Reader::from_str(xml);
        let mut document = Self::default();
        let mut stack: Vec<String> = Vec::new();
        let mut open_block: Option<(String, HashMap<String, String>)> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref element)) => {
                    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                    if open_block.is_none() && block_tags.contains(&name.as_str()) {
                        open_block = Some((name.clone(), HashMap::new()));
                    }
                    stack.push(name);
                }
                Ok(Event::Text(ref text)) => {
                    let value = match text.unescape() {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => String::from_utf8_lossy(text.as_ref()).into_owned(),
                    };
                    document.assign(&stack, &mut open_block, &value);
                }
                Ok(Event::CData(ref cdata)) => {
                    let value = String::from_utf8_lossy(cdata.as_ref()).into_owned();
                    document.assign(&stack, &mut open_block, &value);
                }
                Ok(Event::End(ref element)) => {
                    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                    stack.pop();
                    if let Some((block_tag, fields)) = open_block.take() {
                        if block_tag == name {
                            document.blocks.entry(block_tag).or_default().push(fields);
                        } else {
                            open_block = Some((block_tag, fields));
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(_) => break,
                Ok(_) => {}
            }
        }

        document
    }

    pub(crate) fn scalar(&self, name: &str) -> Option<&str> {
        self.scalars.get(name).map(String::as_str)
    }

    pub(crate) fn blocks(&self, name: &str) -> &[HashMap<String, String>] {
        self.blocks.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Route one chunk of leaf text to the open record or the scalar map.
    /// Indentation between tags arrives as whitespace-only text and is
    /// dropped; so is text sitting directly inside a record container,
    /// which is noise in these schemas.
    fn assign(
        &mut self,
        stack: &[String],
        open_block: &mut Option<(String, HashMap<String, String>)>,
        value: &str,
    ) {
        if value.trim().is_empty() {
            return;
        }
        let Some(leaf) = stack.last() else {
            return;
        };
        match open_block {
            Some((block_tag, fields)) => {
                if leaf != block_tag {
                    append(fields, leaf, value);
                }
            }
            None => append(&mut self.scalars, leaf, value),
        }
    }
}

fn append(fields: &mut HashMap<String, String>, leaf: &str, value: &str) {
    fields
        .entry(leaf.to_string())
        .and_modify(|existing| existing.push_str(value))
        .or_insert_with(|| value.to_string());
}
