use std::borrow::Cow;

use dicom::core::dictionary::{DataDictionary, DataDictionaryEntry, TagRange};
use dicom::core::value::Value;
use dicom::core::Tag;
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::mem::InMemElement;
use dicom::object::{DefaultDicomObject, InMemDicomObject};

use crate::error::{Result, TrolleyToolError};

/// Small helper trait to pull string values from different DICOM object shapes.
pub trait ElementAccess {
    fn element_str(&self, tag: Tag) -> Option<String>;
}

impl ElementAccess for DefaultDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| s.trim().to_string())
    }
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| s.trim().to_string())
    }
}

/// CamelCase keyword for a tag, or the `(GGGG,EEEE)` form for tags outside the dictionary.
/// Range entries (private creators, repeating groups) share one alias across many tags, so those
/// tags keep their numeric form and stay distinct.
pub fn keyword_for(tag: Tag) -> String {
    StandardDataDictionary
        .by_tag(tag)
        .filter(|e| matches!(e.tag_range(), TagRange::Single(_)))
        .map(|e| e.alias().to_string())
        .unwrap_or_else(|| format_tag(tag))
}

/// Tag for a CamelCase keyword like `PatientID`.
pub fn tag_for_keyword(keyword: &str) -> Option<Tag> {
    StandardDataDictionary
        .by_name(keyword)
        .map(|e| e.tag.inner())
}

pub fn format_tag(tag: Tag) -> String {
    format!("({:04X},{:04X})", tag.group(), tag.element())
}

/// Text shown for an element value. Sequences and encapsulated data are summarized.
pub fn element_text(elem: &InMemElement) -> Cow<'_, str> {
    match elem.value() {
        Value::Primitive(p) => Cow::Owned(p.to_str().trim().to_string()),
        Value::Sequence(seq) => Cow::Owned(format!("[sequence: {} item(s)]", seq.items().len())),
        Value::PixelSequence(p) => {
            Cow::Owned(format!("[encapsulated: {} fragment(s)]", p.fragments().len()))
        }
    }
}

/// Comma-separated CamelCase keywords such as `PatientID,AccessionNumber`. An empty string means
/// no keywords at all.
pub fn parse_field_list(value: &str) -> Result<Vec<String>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(',')
        .map(|keyword| {
            if keyword.is_empty() {
                return Err(TrolleyToolError::InvalidFieldName(
                    "Empty DICOM keyword in list. Do you have a trailing comma?".into(),
                ));
            }
            if tag_for_keyword(keyword).is_none() {
                return Err(TrolleyToolError::InvalidFieldName(format!(
                    "{keyword} is not a valid DICOM tag name. Format: CamelCase"
                )));
            }
            Ok(keyword.to_string())
        })
        .collect()
}

/// All elements of a data set as (keyword, value) pairs, in tag order.
pub fn keyword_values(obj: &InMemDicomObject) -> Vec<(String, String)> {
    obj.iter()
        .map(|elem| (keyword_for(elem.header().tag), element_text(elem).into_owned()))
        .collect()
}
