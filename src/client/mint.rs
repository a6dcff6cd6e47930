//
// mint.rs
// Dicom-Trolley-Tool-rs
//
// MINT study search over a logged-in HTTP session, parsing the nested study/series/instance XML.
//
// Thales Matheus Mendonça Santos - October 2026

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::mem::InMemElement;
use dicom::object::InMemDicomObject;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::blocking::Client;
use tracing::debug;

use super::{ClientResult, DicomClientError, Instance, Query, Searcher, Series, Study};
use crate::dicom_access::ElementAccess;

pub struct Mint {
    session: Client,
    url: String,
}

impl Mint {
    pub fn new(session: Client, url: impl Into<String>) -> Self {
        Self {
            session,
            url: url.into().trim_end_matches('/').to_string(),
        }
    }

    fn query_params(query: &Query) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = query
            .search_keys()
            .into_iter()
            .map(|(keyword, value)| (mint_param_name(keyword), value.to_string()))
            .collect();
        params.push(("QueryLevel".into(), query.query_level.as_str().into()));
        if !query.include_fields.is_empty() {
            params.push(("IncludeFields".into(), query.include_fields.join(",")));
        }
        params
    }
}

/// MINT uses lowerCamelCase names for the DICOM keywords it accepts as search parameters.
fn mint_param_name(keyword: &str) -> String {
    match keyword {
        "PatientID" => "patientID".to_string(),
        "StudyInstanceUID" => "studyInstanceUID".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        }
    }
}

impl Searcher for Mint {
    fn find_studies(&self, query: &Query) -> ClientResult<Vec<Study>> {
        let url = format!("{}/studies", self.url);
        debug!("MINT search {} with {}", url, query);
        let body = self
            .session
            .get(&url)
            .query(&Self::query_params(query))
            .send()?
            .error_for_status()?
            .text()?;
        parse_search_response(&body)
    }
}

fn xml_error(e: impl std::fmt::Display) -> DicomClientError {
    DicomClientError::InvalidResponse(format!("MINT xml: {e}"))
}

fn attribute(start: &BytesStart<'_>, name: &[u8]) -> ClientResult<Option<String>> {
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value().map_err(xml_error)?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_attr(start: &BytesStart<'_>) -> ClientResult<Option<InMemElement>> {
    let Some(tag_hex) = attribute(start, b"tag")? else {
        return Ok(None);
    };
    let raw = u32::from_str_radix(&tag_hex, 16)
        .map_err(|_| DicomClientError::InvalidResponse(format!("bad MINT tag '{tag_hex}'")))?;
    let tag = Tag((raw >> 16) as u16, (raw & 0xFFFF) as u16);
    let vr = attribute(start, b"vr")?
        .and_then(|vr| vr.parse::<VR>().ok())
        .unwrap_or(VR::UN);
    let value = attribute(start, b"val")?.unwrap_or_default();
    Ok(Some(DataElement::new(tag, vr, PrimitiveValue::from(value))))
}

/// Parse a `studySearchResults` document. Element namespaces are ignored.
pub fn parse_search_response(xml: &str) -> ClientResult<Vec<Study>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut studies: Vec<Study> = Vec::new();
    // Which object the next <attr> belongs to.
    let mut depth_stack: Vec<&'static str> = Vec::new();

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        let (start, is_empty) = match &event {
            Event::Start(e) => (e.clone(), false),
            Event::Empty(e) => (e.clone(), true),
            Event::End(e) => {
                let name = e.local_name();
                if matches!(name.as_ref(), b"study" | b"series" | b"instance") {
                    depth_stack.pop();
                }
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        match start.local_name().as_ref() {
            b"study" => {
                studies.push(Study::new(String::new(), InMemDicomObject::new_empty()));
                if !is_empty {
                    depth_stack.push("study");
                }
            }
            b"series" => {
                let study = studies.last_mut().ok_or_else(|| xml_error("series outside study"))?;
                study.series.push(Series {
                    uid: String::new(),
                    data: InMemDicomObject::new_empty(),
                    instances: Vec::new(),
                });
                if !is_empty {
                    depth_stack.push("series");
                }
            }
            b"instance" => {
                let series = studies
                    .last_mut()
                    .and_then(|s| s.series.last_mut())
                    .ok_or_else(|| xml_error("instance outside series"))?;
                series.instances.push(Instance {
                    uid: String::new(),
                    data: InMemDicomObject::new_empty(),
                });
                if !is_empty {
                    depth_stack.push("instance");
                }
            }
            b"attr" => {
                let Some(elem) = parse_attr(&start)? else {
                    continue;
                };
                let study = studies.last_mut().ok_or_else(|| xml_error("attr outside study"))?;
                match depth_stack.last() {
                    Some(&"study") => {
                        study.data.put(elem);
                    }
                    Some(&"series") => {
                        if let Some(series) = study.series.last_mut() {
                            series.data.put(elem);
                        }
                    }
                    Some(&"instance") => {
                        if let Some(instance) =
                            study.series.last_mut().and_then(|s| s.instances.last_mut())
                        {
                            instance.data.put(elem);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    for study in &mut studies {
        study.uid = uid_of(&study.data, Tag(0x0020, 0x000D));
        for series in &mut study.series {
            series.uid = uid_of(&series.data, Tag(0x0020, 0x000E));
            for instance in &mut series.instances {
                instance.uid = uid_of(&instance.data, Tag(0x0008, 0x0018));
            }
        }
    }
    Ok(studies)
}

fn uid_of(data: &InMemDicomObject, tag: Tag) -> String {
    data.element_str(tag).unwrap_or_default()
}
