//! Builds study trees from the flat per-object responses returned by C-FIND and QIDO-RS.

use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;

use super::{ClientResult, DicomClientError, Instance, QueryLevel, Series, Study};
use crate::dicom_access::ElementAccess;

const STUDY_LEVEL_TAGS: &[Tag] = &[
    tags::STUDY_INSTANCE_UID,
    tags::PATIENT_NAME,
    tags::PATIENT_ID,
    tags::ISSUER_OF_PATIENT_ID,
    tags::PATIENT_BIRTH_DATE,
    tags::PATIENT_SEX,
    tags::STUDY_DATE,
    tags::STUDY_TIME,
    tags::ACCESSION_NUMBER,
    tags::STUDY_ID,
    tags::STUDY_DESCRIPTION,
    tags::REFERRING_PHYSICIAN_NAME,
    tags::MODALITIES_IN_STUDY,
    tags::NUMBER_OF_STUDY_RELATED_SERIES,
    tags::NUMBER_OF_STUDY_RELATED_INSTANCES,
];

const SERIES_LEVEL_TAGS: &[Tag] = &[
    tags::SERIES_INSTANCE_UID,
    tags::MODALITY,
    tags::SERIES_NUMBER,
    tags::SERIES_DESCRIPTION,
    tags::SERIES_DATE,
    tags::SERIES_TIME,
    tags::BODY_PART_EXAMINED,
    tags::NUMBER_OF_SERIES_RELATED_INSTANCES,
];

/// Tags that belong to a level, used to decide which object in the tree keeps an element.
fn level_tags(level: QueryLevel) -> &'static [Tag] {
    match level {
        QueryLevel::Study => STUDY_LEVEL_TAGS,
        QueryLevel::Series => SERIES_LEVEL_TAGS,
        QueryLevel::Instance => &[],
    }
}

fn required_uid(ds: &InMemDicomObject, tag: Tag, what: &str) -> ClientResult<String> {
    ds.element_str(tag)
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| DicomClientError::InvalidResponse(format!("response without {what}")))
}

/// Split one flat response into the part owned by `level` and the rest.
fn split_off(ds: &InMemDicomObject, level: QueryLevel) -> (InMemDicomObject, InMemDicomObject) {
    let owned = level_tags(level);
    let mut mine = InMemDicomObject::new_empty();
    let mut rest = InMemDicomObject::new_empty();
    for elem in ds.iter() {
        if owned.contains(&elem.header().tag) {
            mine.put(elem.clone());
        } else {
            rest.put(elem.clone());
        }
    }
    (mine, rest)
}

/// Group flat responses by StudyInstanceUID (and SeriesInstanceUID below study level).
/// Response order is kept for studies, series and instances.
pub fn assemble_studies(
    level: QueryLevel,
    responses: Vec<InMemDicomObject>,
) -> ClientResult<Vec<Study>> {
    let mut studies: Vec<Study> = Vec::new();

    for ds in responses {
        let study_uid = required_uid(&ds, tags::STUDY_INSTANCE_UID, "StudyInstanceUID")?;

        if level == QueryLevel::Study {
            studies.push(Study::new(study_uid, ds));
            continue;
        }

        let (study_data, rest) = split_off(&ds, QueryLevel::Study);
        let study_idx = match studies.iter().position(|s| s.uid == study_uid) {
            Some(idx) => idx,
            None => {
                studies.push(Study::new(study_uid, study_data));
                studies.len() - 1
            }
        };
        let study = &mut studies[study_idx];

        let series_uid = required_uid(&ds, tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?;
        let (series_data, instance_data) = if level == QueryLevel::Series {
            (rest, InMemDicomObject::new_empty())
        } else {
            split_off(&rest, QueryLevel::Series)
        };
        let series_idx = match study.series.iter().position(|s| s.uid == series_uid) {
            Some(idx) => idx,
            None => {
                study.series.push(Series {
                    uid: series_uid,
                    data: series_data,
                    instances: Vec::new(),
                });
                study.series.len() - 1
            }
        };

        if level == QueryLevel::Instance {
            let sop_uid = required_uid(&ds, tags::SOP_INSTANCE_UID, "SOPInstanceUID")?;
            study.series[series_idx].instances.push(Instance {
                uid: sop_uid,
                data: instance_data,
            });
        }
    }

    Ok(studies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};

    fn response(study: &str, series: &str, sop: &str) -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            DataElement::new(tags::ACCESSION_NUMBER, VR::SH, PrimitiveValue::from("00123")),
            DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(study)),
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
            DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series)),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop)),
            DataElement::new(tags::INSTANCE_NUMBER, VR::IS, PrimitiveValue::from("1")),
        ])
    }

    #[test]
    fn instance_responses_become_one_tree_per_study() {
        let studies = assemble_studies(
            QueryLevel::Instance,
            vec![
                response("1", "1.1", "1.1.1"),
                response("1", "1.1", "1.1.2"),
                response("1", "1.2", "1.2.1"),
                response("2", "2.1", "2.1.1"),
            ],
        )
        .expect("assemble");

        assert_eq!(studies.len(), 2);
        assert_eq!(studies[0].series.len(), 2);
        assert_eq!(studies[0].series[0].instances.len(), 2);
        assert_eq!(studies[1].instance_count(), 1);

        let study = &studies[0];
        assert_eq!(study.data.element_str(tags::ACCESSION_NUMBER).as_deref(), Some("00123"));
        assert!(study.data.element_str(tags::MODALITY).is_none());
        assert_eq!(study.series[0].data.element_str(tags::MODALITY).as_deref(), Some("CT"));
        let instance = &study.series[0].instances[0];
        assert_eq!(instance.data.element_str(tags::INSTANCE_NUMBER).as_deref(), Some("1"));
        assert!(instance.data.element_str(tags::SERIES_INSTANCE_UID).is_none());
    }

    #[test]
    fn study_level_keeps_whole_response() {
        let studies =
            assemble_studies(QueryLevel::Study, vec![response("1", "1.1", "1.1.1")]).expect("ok");
        assert!(studies[0].series.is_empty());
        assert_eq!(studies[0].data.element_str(tags::MODALITY).as_deref(), Some("CT"));
    }

    #[test]
    fn missing_study_uid_is_rejected() {
        let ds = InMemDicomObject::from_element_iter([DataElement::new(
            tags::PATIENT_ID,
            VR::LO,
            PrimitiveValue::from("p1"),
        )]);
        assert!(matches!(
            assemble_studies(QueryLevel::Study, vec![ds]),
            Err(DicomClientError::InvalidResponse(_))
        ));
    }
}
