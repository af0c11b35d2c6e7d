//! Wire records for the streaming control/data plane.
//!
//! All records are versioned and carry a request id plus the session `ident`.
//! Control codes travel as raw small integers grouped by range (1–6 lifecycle
//! operations, 11–14 ASK operations, 21–27 STATUS reports); an unrecognized
//! code decodes to [`StreamingControl::Unknown`] instead of failing
//! deserialization, so a newer peer never breaks an older one.

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

/// Current wire schema version.
pub const WIRE_VERSION: u8 = 1;

/// Control operation vocabulary.
///
/// Lifecycle operations change the canonical stream state and flow from the
/// streamer to players. ASK operations are requests from a player for the
/// streamer to perform a lifecycle operation. STATUS reports flow from a
/// player back to the streamer without triggering an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamingControl {
    StartAudioStreaming,
    StartVideoStreaming,
    PauseStreaming,
    ResumeStreaming,
    SeekStreaming,
    StopStreaming,
    AskPause,
    AskResume,
    AskSeek,
    AskStop,
    StatusPlaying,
    StatusPaused,
    StatusReady,
    StatusUnsupported,
    StatusError,
    StatusStopped,
    StatusCompleted,
    Unknown,
}

impl StreamingControl {
    pub fn to_wire(self) -> u8 {
        match self {
            StreamingControl::StartAudioStreaming => 1,
            StreamingControl::StartVideoStreaming => 2,
            StreamingControl::PauseStreaming => 3,
            StreamingControl::ResumeStreaming => 4,
            StreamingControl::SeekStreaming => 5,
            StreamingControl::StopStreaming => 6,
            StreamingControl::AskPause => 11,
            StreamingControl::AskResume => 12,
            StreamingControl::AskSeek => 13,
            StreamingControl::AskStop => 14,
            StreamingControl::StatusPlaying => 21,
            StreamingControl::StatusPaused => 22,
            StreamingControl::StatusReady => 23,
            StreamingControl::StatusUnsupported => 24,
            StreamingControl::StatusError => 25,
            StreamingControl::StatusStopped => 26,
            StreamingControl::StatusCompleted => 27,
            StreamingControl::Unknown => 0,
        }
    }

    pub fn from_wire(code: u8) -> Self {
        match code {
            1 => StreamingControl::StartAudioStreaming,
            2 => StreamingControl::StartVideoStreaming,
            3 => StreamingControl::PauseStreaming,
            4 => StreamingControl::ResumeStreaming,
            5 => StreamingControl::SeekStreaming,
            6 => StreamingControl::StopStreaming,
            11 => StreamingControl::AskPause,
            12 => StreamingControl::AskResume,
            13 => StreamingControl::AskSeek,
            14 => StreamingControl::AskStop,
            21 => StreamingControl::StatusPlaying,
            22 => StreamingControl::StatusPaused,
            23 => StreamingControl::StatusReady,
            24 => StreamingControl::StatusUnsupported,
            25 => StreamingControl::StatusError,
            26 => StreamingControl::StatusStopped,
            27 => StreamingControl::StatusCompleted,
            _ => StreamingControl::Unknown,
        }
    }

    pub fn is_status(self) -> bool {
        (21..=27).contains(&self.to_wire())
    }

    pub fn is_ask(self) -> bool {
        (11..=14).contains(&self.to_wire())
    }
}

/// Control-plane message: lifecycle, ASK and STATUS traffic.
#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
#[rkyv(compare(PartialEq))]
pub struct StreamingControlIQ {
    pub version: u8,
    pub request_id: u64,
    pub ident: u64,
    control: u8,
    /// Total stream length in bytes where known, 0 otherwise.
    pub length: u64,
    /// Sender wall clock, milliseconds.
    pub timestamp: u64,
    /// Sender playback position, milliseconds.
    pub position: u64,
    /// Sender's last measured latency, milliseconds.
    pub latency: i32,
}

impl StreamingControlIQ {
    pub fn new(
        request_id: u64,
        ident: u64,
        control: StreamingControl,
        length: u64,
        timestamp: u64,
        position: u64,
        latency: i32,
    ) -> Self {
        Self {
            version: WIRE_VERSION,
            request_id,
            ident,
            control: control.to_wire(),
            length,
            timestamp,
            position,
            latency,
        }
    }

    pub fn control(&self) -> StreamingControl {
        StreamingControl::from_wire(self.control)
    }
}

/// Data-plane response carrying one byte-range block, or nothing when the
/// requested range does not exist.
#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
#[rkyv(compare(PartialEq))]
pub struct StreamingDataIQ {
    pub version: u8,
    pub request_id: u64,
    pub ident: u64,
    pub offset: u64,
    /// Echo of the request timestamp, for RTT measurement.
    pub timestamp: u64,
    /// Streamer playback position when the response was built, milliseconds.
    pub streamer_position: u64,
    /// Server-side processing time for this request, milliseconds.
    pub streamer_latency: i32,
    pub data: Option<Vec<u8>>,
}

/// Data-plane block request issued by a pull source.
#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
#[rkyv(compare(PartialEq))]
pub struct StreamingRequestIQ {
    pub version: u8,
    pub request_id: u64,
    pub ident: u64,
    pub offset: u64,
    pub length: u64,
    /// Requester wall clock, milliseconds.
    pub timestamp: u64,
    /// Requester playback position, milliseconds.
    pub player_position: u64,
    /// Requester's last measured round-trip time, milliseconds.
    pub last_rtt: i32,
}

/// Session metadata broadcast when streaming starts.
#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
#[rkyv(compare(PartialEq))]
pub struct StreamingInfoIQ {
    pub version: u8,
    pub request_id: u64,
    pub ident: u64,
    pub title: String,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub artwork: Option<Vec<u8>>,
    /// Media duration, milliseconds.
    pub duration: u64,
}

/// Top-level envelope sent over the signaling/data channel.
#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
pub enum StreamingPacket {
    Control(StreamingControlIQ),
    Data(StreamingDataIQ),
    Request(StreamingRequestIQ),
    Info(StreamingInfoIQ),
}

impl StreamingPacket {
    /// Session ident this packet belongs to.
    pub fn ident(&self) -> u64 {
        match self {
            StreamingPacket::Control(iq) => iq.ident,
            StreamingPacket::Data(iq) => iq.ident,
            StreamingPacket::Request(iq) => iq.ident,
            StreamingPacket::Info(iq) => iq.ident,
        }
    }

    pub fn encode(&self) -> StreamResult<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| StreamError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> StreamResult<Self> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| StreamError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_codes_grouped_by_range() {
        assert_eq!(StreamingControl::StartAudioStreaming.to_wire(), 1);
        assert_eq!(StreamingControl::StopStreaming.to_wire(), 6);
        assert_eq!(StreamingControl::AskPause.to_wire(), 11);
        assert_eq!(StreamingControl::AskStop.to_wire(), 14);
        assert_eq!(StreamingControl::StatusPlaying.to_wire(), 21);
        assert_eq!(StreamingControl::StatusCompleted.to_wire(), 27);
    }

    #[test]
    fn test_control_round_trip_all_codes() {
        for code in [1, 2, 3, 4, 5, 6, 11, 12, 13, 14, 21, 22, 23, 24, 25, 26, 27] {
            let control = StreamingControl::from_wire(code);
            assert_ne!(control, StreamingControl::Unknown);
            assert_eq!(control.to_wire(), code);
        }
    }

    #[test]
    fn test_unrecognized_code_decodes_to_unknown() {
        for code in [0u8, 7, 10, 15, 20, 28, 255] {
            assert_eq!(StreamingControl::from_wire(code), StreamingControl::Unknown);
        }
    }

    #[test]
    fn test_ask_and_status_classification() {
        assert!(StreamingControl::AskSeek.is_ask());
        assert!(!StreamingControl::AskSeek.is_status());
        assert!(StreamingControl::StatusError.is_status());
        assert!(!StreamingControl::PauseStreaming.is_ask());
        assert!(!StreamingControl::Unknown.is_ask());
        assert!(!StreamingControl::Unknown.is_status());
    }

    #[test]
    fn test_control_packet_round_trip() {
        let iq = StreamingControlIQ::new(
            7,
            42,
            StreamingControl::PauseStreaming,
            20_000,
            1_234_567,
            9_000,
            35,
        );
        let packet = StreamingPacket::Control(iq);
        let bytes = packet.encode().unwrap();
        let decoded = StreamingPacket::decode(&bytes).unwrap();
        let StreamingPacket::Control(iq) = decoded else {
            panic!("expected Control");
        };
        assert_eq!(iq.version, WIRE_VERSION);
        assert_eq!(iq.ident, 42);
        assert_eq!(iq.control(), StreamingControl::PauseStreaming);
        assert_eq!(iq.position, 9_000);
        assert_eq!(iq.latency, 35);
    }

    #[test]
    fn test_data_packet_with_and_without_payload() {
        let with = StreamingPacket::Data(StreamingDataIQ {
            version: WIRE_VERSION,
            request_id: 1,
            ident: 42,
            offset: 8192,
            timestamp: 100,
            streamer_position: 5_000,
            streamer_latency: 3,
            data: Some(vec![0xAB; 8192]),
        });
        let bytes = with.encode().unwrap();
        let StreamingPacket::Data(iq) = StreamingPacket::decode(&bytes).unwrap() else {
            panic!("expected Data");
        };
        assert_eq!(iq.data.as_ref().map(Vec::len), Some(8192));

        let without = StreamingPacket::Data(StreamingDataIQ {
            data: None,
            ..iq.clone()
        });
        let bytes = without.encode().unwrap();
        let StreamingPacket::Data(iq) = StreamingPacket::decode(&bytes).unwrap() else {
            panic!("expected Data");
        };
        assert!(iq.data.is_none());
    }

    #[test]
    fn test_info_packet_round_trip() {
        let packet = StreamingPacket::Info(StreamingInfoIQ {
            version: WIRE_VERSION,
            request_id: 3,
            ident: 42,
            title: "Blue in Green".into(),
            album: Some("Kind of Blue".into()),
            artist: None,
            artwork: Some(vec![1, 2, 3]),
            duration: 337_000,
        });
        let bytes = packet.encode().unwrap();
        let StreamingPacket::Info(iq) = StreamingPacket::decode(&bytes).unwrap() else {
            panic!("expected Info");
        };
        assert_eq!(iq.title, "Blue in Green");
        assert_eq!(iq.artist, None);
        assert_eq!(iq.duration, 337_000);
    }

    #[test]
    fn test_garbage_does_not_decode() {
        assert!(StreamingPacket::decode(&[0xFF, 0x01, 0x02]).is_err());
    }
}
