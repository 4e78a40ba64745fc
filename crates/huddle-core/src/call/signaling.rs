//! Wire types for the call-signaling mailbox.
//!
//! One call record per room at a fixed, well-known document id, plus
//! two unordered candidate sub-collections (one per side). Field
//! names match the store schema the original clients write.

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

use crate::rooms::RoomCode;
use crate::store::{CollectionPath, DocumentPath};

/// Fixed sub-identifier: one 1:1 call slot per room.
pub const CALL_DOC_ID: &str = "room-call";

pub const OFFER_CANDIDATES: &str = "offerCandidates";
pub const ANSWER_CANDIDATES: &str = "answerCandidates";

/// Which half of the exchange the record currently represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
}

/// The medium the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMedium {
    Audio,
    Video,
}

/// The signaling record. Written whole by the caller; the answerer
/// merges the answer fields in place, preserving the offer's caller
/// metadata while overwriting `sdp` with the answer description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(rename = "callType")]
    pub medium: CallMedium,
    pub caller: String,
    #[serde(rename = "callerName")]
    pub caller_name: String,
    pub sdp: String,
    #[serde(rename = "offerType", skip_serializing_if = "Option::is_none")]
    pub offer_type: Option<String>,
    #[serde(rename = "answerType", skip_serializing_if = "Option::is_none")]
    pub answer_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callee: Option<String>,
}

/// One ICE candidate as relayed through the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment")]
    pub username_fragment: Option<String>,
}

impl From<RTCIceCandidateInit> for CandidateRecord {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<CandidateRecord> for RTCIceCandidateInit {
    fn from(record: CandidateRecord) -> Self {
        Self {
            candidate: record.candidate,
            sdp_mid: record.sdp_mid,
            sdp_mline_index: record.sdp_mline_index,
            username_fragment: record.username_fragment,
        }
    }
}

/// Store locations for one room's call slot.
#[derive(Debug, Clone)]
pub(crate) struct CallPaths {
    pub doc: DocumentPath,
    pub offer_candidates: CollectionPath,
    pub answer_candidates: CollectionPath,
}

impl CallPaths {
    pub fn for_room(code: &RoomCode) -> Self {
        let doc = CollectionPath::root("rooms")
            .doc(code.as_str())
            .collection("calls")
            .doc(CALL_DOC_ID);
        Self {
            offer_candidates: doc.collection(OFFER_CANDIDATES),
            answer_candidates: doc.collection(ANSWER_CANDIDATES),
            doc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_record_wire_names_match_the_schema() {
        let record = CallRecord {
            kind: SignalKind::Offer,
            medium: CallMedium::Video,
            caller: "u1".into(),
            caller_name: "alice".into(),
            sdp: "v=0".into(),
            offer_type: Some("offer".into()),
            answer_type: None,
            callee: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["callType"], "video");
        assert_eq!(value["callerName"], "alice");
        assert_eq!(value["offerType"], "offer");
        assert!(value.get("answerType").is_none());
        assert!(value.get("callee").is_none());
    }

    #[test]
    fn answered_record_parses_with_offer_fields_intact() {
        // The shape after the answerer's in-place merge.
        let value = serde_json::json!({
            "type": "answer",
            "callType": "audio",
            "caller": "u1",
            "callerName": "alice",
            "sdp": "answer-sdp",
            "offerType": "offer",
            "answerType": "answer",
            "callee": "u2",
        });
        let record: CallRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.kind, SignalKind::Answer);
        assert_eq!(record.medium, CallMedium::Audio);
        assert_eq!(record.caller, "u1");
        assert_eq!(record.callee.as_deref(), Some("u2"));
        assert_eq!(record.sdp, "answer-sdp");
    }

    #[test]
    fn candidate_record_round_trips_the_rtc_init_shape() {
        let record = CandidateRecord {
            candidate: "candidate:1 1 udp 2130706431 127.0.0.1 54555 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some("frag".into()),
        };
        let init: RTCIceCandidateInit = record.clone().into();
        assert_eq!(CandidateRecord::from(init), record);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["sdpMid"], "0");
        assert_eq!(value["sdpMLineIndex"], 0);
        assert_eq!(value["usernameFragment"], "frag");
    }

    #[test]
    fn call_paths_follow_the_room_hierarchy() {
        let code = RoomCode::parse("ABCDE").unwrap();
        let paths = CallPaths::for_room(&code);
        assert_eq!(paths.doc.as_str(), "rooms/ABCDE/calls/room-call");
        assert_eq!(
            paths.offer_candidates.as_str(),
            "rooms/ABCDE/calls/room-call/offerCandidates"
        );
        assert_eq!(
            paths.answer_candidates.as_str(),
            "rooms/ABCDE/calls/room-call/answerCandidates"
        );
    }
}
