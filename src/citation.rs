//! Citation XML ingestion against the fixed justice-domain schema.
//!
//! Field paths are descendant lookups with fixed namespaces; a missing path
//! yields the empty string, never an error.

use chrono::NaiveDate;
use roxmltree::{Document, Node};
use serde::Serialize;

use crate::{
    model::{ContactInput, DefendantInput},
    Error, Result,
};

const NS_J: &str = "http://niem.gov/niem/domains/jxdm/4.0";
const NS_NC: &str = "http://niem.gov/niem/niem-core/2.0";
const NS_S: &str = "http://niem.gov/niem/structures/2.0";
const NS_JSI: &str = "http://www.justicesystems.com/iepd";

fn namespace(prefix: &str) -> &'static str {
    match prefix {
        "j" => NS_J,
        "nc" => NS_NC,
        "s" => NS_S,
        "jsi" => NS_JSI,
        _ => "",
    }
}

fn tag_matches(node: Node, segment: &str) -> bool {
    let Some((prefix, local)) = segment.split_once(':') else {
        return false;
    };
    node.is_element()
        && node.tag_name().name() == local
        && node.tag_name().namespace() == Some(namespace(prefix))
}

fn find_descendant<'a>(scope: Node<'a, 'a>, segment: &str) -> Option<Node<'a, 'a>> {
    scope
        .descendants()
        .filter(|node| node.id() != scope.id())
        .find(|node| tag_matches(*node, segment))
}

/// Resolve a descendant path like `["j:Citation", "nc:IdentificationID"]`
/// and return the trimmed element text, or `""` when any step is missing.
fn resolve(scope: Node, path: &[&str]) -> String {
    let mut current = scope;
    for segment in path {
        match find_descendant(current, segment) {
            Some(node) => current = node,
            None => return String::new(),
        }
    }
    current.text().map(str::trim).unwrap_or("").to_string()
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Direct citation fields, as they appear in the document. Values stay
/// strings here; typed coercion happens when they are turned into inputs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CitationFields {
    pub case_number: String,
    pub ticket_number: String,
    pub violation_date: String,
    pub issue_datetime: String,
    pub hearing_date: String,
    pub hearing_time: String,
    pub violation_location: String,
    pub additional_notes: String,
    pub legal_speed: String,
    pub recorded_speed: String,
    pub badge_number: String,
    pub plate_number: String,
    pub case_type: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChargeDraft {
    pub charge_code: String,
    pub charge_description: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct CitationExtract {
    pub citation: CitationFields,
    pub defendant: DefendantInput,
    pub charges: Vec<ChargeDraft>,
}

/// Case number alone, used to build the storage key during ingest.
pub fn case_number_from_xml(content: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(content)
        .map_err(|_| Error::Validation("citation xml is not valid utf-8".into()))?;
    let doc = Document::parse(text)
        .map_err(|e| Error::Validation(format!("malformed citation xml: {e}")))?;
    Ok(resolve(
        doc.root_element(),
        &["j:Citation", "nc:IdentificationID"],
    ))
}

pub fn parse(content: &[u8]) -> Result<CitationExtract> {
    let text = std::str::from_utf8(content)
        .map_err(|_| Error::Validation("citation xml is not valid utf-8".into()))?;
    let doc = Document::parse(text)
        .map_err(|e| Error::Validation(format!("malformed citation xml: {e}")))?;
    let root = doc.root_element();

    let citation = CitationFields {
        case_number: resolve(root, &["j:Citation", "nc:IdentificationID"]),
        ticket_number: resolve(
            root,
            &[
                "j:Citation",
                "j:CitationViolation",
                "nc:ActivityIdentification",
                "nc:IdentificationID",
            ],
        ),
        violation_date: resolve(root, &["j:Citation", "nc:Date"]),
        issue_datetime: resolve(root, &["j:Citation", "nc:Date"]),
        hearing_date: resolve(root, &["j:CourtAppearanceDate", "nc:DateTime"]),
        hearing_time: resolve(root, &["j:CourtAppearanceDate", "nc:DateTime"]),
        violation_location: resolve(
            root,
            &[
                "j:Citation",
                "j:CitationIssuedLocation",
                "nc:LocationDescriptionText",
            ],
        ),
        additional_notes: resolve(
            root,
            &[
                "j:Citation",
                "j:CitationViolation",
                "nc:IncidentObservationText",
            ],
        ),
        legal_speed: resolve(
            root,
            &[
                "jsi:DrivingIncident",
                "j:DrivingIncidentLegalSpeedRate",
                "nc:MeasureText",
            ],
        ),
        recorded_speed: resolve(
            root,
            &[
                "jsi:DrivingIncident",
                "j:DrivingIncidentRecordedSpeedRate",
                "nc:MeasureText",
            ],
        ),
        badge_number: resolve(
            root,
            &[
                "j:EnforcementOfficialBadgeIdentification",
                "nc:IdentificationID",
            ],
        ),
        plate_number: resolve(
            root,
            &[
                "nc:ConveyanceRegistrationPlateIdentification",
                "nc:IdentificationID",
            ],
        ),
        case_type: "Traffic".to_string(),
    };

    let defendant = DefendantInput {
        first_name: resolve(root, &["nc:Person", "nc:PersonName", "nc:PersonGivenName"]),
        middle_name: non_empty(resolve(
            root,
            &["nc:Person", "nc:PersonName", "nc:PersonMiddleName"],
        )),
        last_name: resolve(root, &["nc:Person", "nc:PersonName", "nc:PersonSurName"]),
        suffix: non_empty(resolve(
            root,
            &["nc:Person", "nc:PersonName", "nc:PersonNameSuffixText"],
        )),
        ssn_id: resolve(
            root,
            &["nc:Person", "nc:PersonSSNIdentification", "nc:IdentificationID"],
        ),
        dob: NaiveDate::parse_from_str(
            &resolve(root, &["nc:Person", "nc:PersonBirthDate", "nc:Date"]),
            "%Y-%m-%d",
        )
        .ok(),
        height: non_empty(resolve(
            root,
            &["nc:Person", "nc:PersonHeightDescriptionText"],
        )),
        weight: non_empty(resolve(
            root,
            &["nc:Person", "nc:PersonWeightDescriptionText"],
        )),
        eye_color: non_empty(resolve(root, &["nc:Person", "nc:PersonEyeColorCode"])),
        hair_color: non_empty(resolve(root, &["nc:Person", "nc:PersonHairColorCode"])),
        contacts: vec![ContactInput {
            mailing_address: resolve(
                root,
                &["nc:StructuredAddress", "nc:AddressDeliveryPointText"],
            ),
            address_delivery_point: resolve(
                root,
                &["nc:StructuredAddress", "nc:AddressDeliveryPointText"],
            ),
            location_city_name: resolve(root, &["nc:StructuredAddress", "nc:LocationCityName"]),
            location_state_code: resolve(
                root,
                &["nc:StructuredAddress", "nc:LocationStateUSPostalServiceCode"],
            ),
            location_postal_code: resolve(
                root,
                &["nc:StructuredAddress", "nc:LocationStateUSPostalServiceCode"],
            ),
            phone_number: resolve(root, &["nc:TelephoneNumberFullID"]),
        }],
    };

    let charges = root
        .descendants()
        .filter(|node| tag_matches(*node, "j:ChargeStatute"))
        .map(|node| ChargeDraft {
            charge_code: resolve(node, &["j:StatuteCodeIdentification", "nc:IdentificationID"]),
            charge_description: resolve(node, &["j:StatuteDescriptionText"]),
        })
        .collect();

    Ok(CitationExtract {
        citation,
        defendant,
        charges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<jsi:CitationDocument
    xmlns:jsi="http://www.justicesystems.com/iepd"
    xmlns:j="http://niem.gov/niem/domains/jxdm/4.0"
    xmlns:nc="http://niem.gov/niem/niem-core/2.0">
  <j:Citation>
    <nc:IdentificationID>TR-2024-0042</nc:IdentificationID>
    <nc:Date>2024-01-15</nc:Date>
    <j:CitationIssuedLocation>
      <nc:LocationDescriptionText>Main St and 5th Ave</nc:LocationDescriptionText>
    </j:CitationIssuedLocation>
    <j:CitationViolation>
      <nc:ActivityIdentification>
        <nc:IdentificationID>TK-7781</nc:IdentificationID>
      </nc:ActivityIdentification>
      <nc:IncidentObservationText>Observed at high speed</nc:IncidentObservationText>
    </j:CitationViolation>
  </j:Citation>
  <jsi:DrivingIncident>
    <j:DrivingIncidentLegalSpeedRate><nc:MeasureText>35</nc:MeasureText></j:DrivingIncidentLegalSpeedRate>
    <j:DrivingIncidentRecordedSpeedRate><nc:MeasureText>52</nc:MeasureText></j:DrivingIncidentRecordedSpeedRate>
  </jsi:DrivingIncident>
  <nc:Person>
    <nc:PersonName>
      <nc:PersonGivenName>Jordan</nc:PersonGivenName>
      <nc:PersonSurName>Reyes</nc:PersonSurName>
    </nc:PersonName>
    <nc:PersonBirthDate><nc:Date>1990-06-02</nc:Date></nc:PersonBirthDate>
    <nc:PersonSSNIdentification>
      <nc:IdentificationID>123-45-6789</nc:IdentificationID>
    </nc:PersonSSNIdentification>
    <nc:PersonEyeColorCode>BRO</nc:PersonEyeColorCode>
  </nc:Person>
  <nc:StructuredAddress>
    <nc:AddressDeliveryPointText>12 Elm Street</nc:AddressDeliveryPointText>
    <nc:LocationCityName>Springfield</nc:LocationCityName>
    <nc:LocationStateUSPostalServiceCode>IL</nc:LocationStateUSPostalServiceCode>
  </nc:StructuredAddress>
  <nc:TelephoneNumberFullID>555-0100</nc:TelephoneNumberFullID>
  <j:ChargeStatute>
    <j:StatuteCodeIdentification><nc:IdentificationID>625-5/11-601</nc:IdentificationID></j:StatuteCodeIdentification>
    <j:StatuteDescriptionText>Speeding</j:StatuteDescriptionText>
  </j:ChargeStatute>
  <j:ChargeStatute>
    <j:StatuteCodeIdentification><nc:IdentificationID>625-5/3-707</nc:IdentificationID></j:StatuteCodeIdentification>
    <j:StatuteDescriptionText>Uninsured vehicle</j:StatuteDescriptionText>
  </j:ChargeStatute>
</jsi:CitationDocument>"#;

    #[test]
    fn extracts_case_number() {
        assert_eq!(
            case_number_from_xml(SAMPLE.as_bytes()).unwrap(),
            "TR-2024-0042"
        );
    }

    #[test]
    fn extracts_citation_defendant_and_charges() {
        let extract = parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(extract.citation.case_number, "TR-2024-0042");
        assert_eq!(extract.citation.ticket_number, "TK-7781");
        assert_eq!(extract.citation.violation_date, "2024-01-15");
        assert_eq!(extract.citation.violation_location, "Main St and 5th Ave");
        assert_eq!(extract.citation.recorded_speed, "52");
        assert_eq!(extract.citation.case_type, "Traffic");

        assert_eq!(extract.defendant.first_name, "Jordan");
        assert_eq!(extract.defendant.last_name, "Reyes");
        assert_eq!(extract.defendant.ssn_id, "123-45-6789");
        assert_eq!(
            extract.defendant.dob,
            NaiveDate::from_ymd_opt(1990, 6, 2)
        );
        assert_eq!(extract.defendant.middle_name, None);
        assert_eq!(extract.defendant.contacts.len(), 1);
        assert_eq!(extract.defendant.contacts[0].location_city_name, "Springfield");

        assert_eq!(extract.charges.len(), 2);
        assert_eq!(extract.charges[0].charge_code, "625-5/11-601");
        assert_eq!(extract.charges[1].charge_description, "Uninsured vehicle");
    }

    #[test]
    fn missing_paths_yield_empty_strings() {
        let doc = r#"<jsi:CitationDocument xmlns:jsi="http://www.justicesystems.com/iepd"/>"#;
        let extract = parse(doc.as_bytes()).unwrap();
        assert_eq!(extract.citation.case_number, "");
        assert_eq!(extract.defendant.first_name, "");
        assert_eq!(extract.defendant.dob, None);
        assert!(extract.charges.is_empty());
    }

    #[test]
    fn malformed_xml_is_a_validation_error() {
        let err = parse(b"<unclosed").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn hearing_fields_absent_in_sample_are_empty() {
        let extract = parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(extract.citation.hearing_date, "");
        assert_eq!(extract.citation.badge_number, "");
    }
}
