//
// dicom_qr.rs
// Dicom-Trolley-Tool-rs
//
// Study Root C-FIND service class user: opens an association per query, sends the identifier and
// collects pending responses until the final status arrives.
//
// Thales Matheus Mendonça Santos - October 2026

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::tags;
use dicom::encoding::TransferSyntaxIndex;
use dicom::object::InMemDicomObject;
use dicom::transfer_syntax::TransferSyntaxRegistry;
use dicom_ul::association::client::ClientAssociationOptions;
use dicom_ul::pdu::{PDataValue, PDataValueType, Pdu, PresentationContextResultReason};
use tracing::{debug, info};

use super::tree::assemble_studies;
use super::{ClientResult, DicomClientError, Query, QueryLevel, Searcher, Study};
use crate::dicom_access::tag_for_keyword;

/// Study Root Query/Retrieve Information Model - FIND
const STUDY_ROOT_FIND: &str = "1.2.840.10008.5.1.4.1.2.2.1";
const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

const STATUS_SUCCESS: u16 = 0x0000;
const STATUS_PENDING: u16 = 0xFF00;
const STATUS_PENDING_WARNING: u16 = 0xFF01;

pub struct DicomQr {
    host: String,
    port: u16,
    /// Calling AE title (ours).
    aet: String,
    /// Called AE title (the server's).
    aec: String,
}

impl DicomQr {
    pub fn new(host: impl Into<String>, port: u16, aet: impl Into<String>, aec: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            aet: aet.into(),
            aec: aec.into(),
        }
    }
}

fn qr_level(level: QueryLevel) -> &'static str {
    match level {
        QueryLevel::Study => "STUDY",
        QueryLevel::Series => "SERIES",
        QueryLevel::Instance => "IMAGE",
    }
}

/// VR for the handful of keys we send ourselves; return keys go out empty so LO is fine for them.
fn vr_for(tag: Tag) -> VR {
    match tag {
        tags::STUDY_INSTANCE_UID | tags::SERIES_INSTANCE_UID | tags::SOP_INSTANCE_UID => VR::UI,
        tags::PATIENT_NAME => VR::PN,
        tags::ACCESSION_NUMBER => VR::SH,
        tags::MODALITIES_IN_STUDY | tags::MODALITY | tags::QUERY_RETRIEVE_LEVEL => VR::CS,
        tags::STUDY_DATE | tags::PATIENT_BIRTH_DATE => VR::DA,
        _ => VR::LO,
    }
}

/// C-FIND identifier for a query: search keys with values, return keys empty.
pub fn build_identifier(query: &Query) -> InMemDicomObject {
    let mut identifier = InMemDicomObject::new_empty();
    identifier.put(DataElement::new(
        tags::QUERY_RETRIEVE_LEVEL,
        VR::CS,
        PrimitiveValue::from(qr_level(query.query_level)),
    ));

    let mut return_keys = vec![tags::STUDY_INSTANCE_UID];
    if query.query_level != QueryLevel::Study {
        return_keys.push(tags::SERIES_INSTANCE_UID);
    }
    if query.query_level == QueryLevel::Instance {
        return_keys.push(tags::SOP_INSTANCE_UID);
    }
    return_keys.extend(query.include_fields.iter().filter_map(|k| tag_for_keyword(k)));
    for tag in return_keys {
        identifier.put(DataElement::new(tag, vr_for(tag), PrimitiveValue::Empty));
    }

    for (keyword, value) in query.search_keys() {
        if let Some(tag) = tag_for_keyword(keyword) {
            identifier.put(DataElement::new(tag, vr_for(tag), PrimitiveValue::from(value)));
        }
    }
    identifier
}

fn find_command(message_id: u16) -> InMemDicomObject {
    // Command set is a tiny DICOM dataset, always Implicit VR Little Endian.
    let mut cmd = InMemDicomObject::new_empty();
    cmd.put(DataElement::new(
        Tag(0x0000, 0x0002),
        VR::UI,
        PrimitiveValue::from(STUDY_ROOT_FIND),
    ));
    cmd.put(DataElement::new(
        Tag(0x0000, 0x0100),
        VR::US,
        PrimitiveValue::from(0x0020_u16),
    ));
    cmd.put(DataElement::new(
        Tag(0x0000, 0x0110),
        VR::US,
        PrimitiveValue::from(message_id),
    ));
    cmd.put(DataElement::new(
        Tag(0x0000, 0x0700),
        VR::US,
        PrimitiveValue::from(0_u16),
    ));
    cmd.put(DataElement::new(
        Tag(0x0000, 0x0800),
        VR::US,
        PrimitiveValue::from(0x0001_u16),
    ));
    cmd
}

fn assoc_error(e: impl std::fmt::Display) -> DicomClientError {
    DicomClientError::Association(e.to_string())
}

impl DicomQr {
    fn c_find(&self, query: &Query) -> ClientResult<Vec<InMemDicomObject>> {
        let addr = format!("{}:{}", self.host, self.port);
        debug!("C-FIND {} -> {}@{}", self.aet, self.aec, addr);

        let mut association = ClientAssociationOptions::new()
            .calling_ae_title(self.aet.clone())
            .called_ae_title(self.aec.clone())
            .with_presentation_context(STUDY_ROOT_FIND, vec![EXPLICIT_VR_LE, IMPLICIT_VR_LE])
            .establish(addr.as_str())
            .map_err(assoc_error)?;

        let pc = association
            .presentation_contexts()
            .iter()
            .find(|pc| pc.reason == PresentationContextResultReason::Acceptance)
            .ok_or_else(|| assoc_error("No accepted presentation context for Study Root FIND"))?;
        let pc_id = pc.id;
        let negotiated_ts_uid = pc.transfer_syntax.trim_end_matches('\0').to_string();

        let ts_ivrle = TransferSyntaxRegistry
            .get(IMPLICIT_VR_LE)
            .ok_or_else(|| assoc_error("Implicit VR Little Endian transfer syntax not found"))?;
        let ts_negotiated = TransferSyntaxRegistry.get(&negotiated_ts_uid).ok_or_else(|| {
            assoc_error(format!("Negotiated transfer syntax {negotiated_ts_uid} not found"))
        })?;

        let mut command_bytes = Vec::new();
        find_command(1)
            .write_dataset_with_ts(&mut command_bytes, ts_ivrle)
            .map_err(assoc_error)?;
        let mut identifier_bytes = Vec::new();
        build_identifier(query)
            .write_dataset_with_ts(&mut identifier_bytes, ts_negotiated)
            .map_err(assoc_error)?;

        association
            .send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc_id,
                    value_type: PDataValueType::Command,
                    is_last: true,
                    data: command_bytes,
                }],
            })
            .map_err(assoc_error)?;
        association
            .send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc_id,
                    value_type: PDataValueType::Data,
                    is_last: true,
                    data: identifier_bytes,
                }],
            })
            .map_err(assoc_error)?;

        // Responses may be fragmented over several PDVs; buffer until is_last.
        let mut responses = Vec::new();
        let mut command_buf = Vec::new();
        let mut data_buf = Vec::new();
        let mut done = false;
        while !done {
            let data = match association.receive().map_err(assoc_error)? {
                Pdu::PData { data } => data,
                other => {
                    return Err(assoc_error(format!("unexpected PDU during C-FIND: {other:?}")));
                }
            };
            for pdv in data {
                match pdv.value_type {
                    PDataValueType::Command => {
                        command_buf.extend_from_slice(&pdv.data);
                        if !pdv.is_last {
                            continue;
                        }
                        let cmd = InMemDicomObject::read_dataset_with_ts(&command_buf[..], ts_ivrle)
                            .map_err(assoc_error)?;
                        command_buf.clear();
                        let status = cmd
                            .element(Tag(0x0000, 0x0900))
                            .map_err(assoc_error)?
                            .to_int::<u16>()
                            .map_err(assoc_error)?;
                        match status {
                            STATUS_PENDING | STATUS_PENDING_WARNING => {}
                            STATUS_SUCCESS => done = true,
                            other => {
                                let _ = association.release();
                                return Err(DicomClientError::Status(other));
                            }
                        }
                    }
                    PDataValueType::Data => {
                        data_buf.extend_from_slice(&pdv.data);
                        if pdv.is_last {
                            let mut identifier =
                                InMemDicomObject::read_dataset_with_ts(&data_buf[..], ts_negotiated)
                                    .map_err(assoc_error)?;
                            identifier.remove_element(tags::QUERY_RETRIEVE_LEVEL);
                            responses.push(identifier);
                            data_buf.clear();
                        }
                    }
                }
            }
        }

        let _ = association.release();
        info!("C-FIND returned {} response(s)", responses.len());
        Ok(responses)
    }
}

impl Searcher for DicomQr {
    fn find_studies(&self, query: &Query) -> ClientResult<Vec<Study>> {
        let responses = self.c_find(query)?;
        assemble_studies(query.query_level, responses)
    }
}
