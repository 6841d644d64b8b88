use crate::radiotap::{self, Radiotap};
use libwifi::frame::components::MacAddress;
use libwifi::frame::Frame;
use libwifi::parse_frame;
use log::trace;
use thiserror::Error;

/// Conventional label for a probe request whose SSID field is absent or empty.
pub const UNDIRECTED_PROBE: &str = "Undirected Probe";

/// One 802.11 information element as it appeared on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformationElement {
    pub id: u8,
    pub len: u8,
    pub data: Vec<u8>,
}

impl InformationElement {
    pub fn hex(&self) -> String {
        self.data.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("truncated radiotap header")]
    TruncatedRadiotap,
    #[error("frame too short for 802.11 header")]
    TruncatedFrame,
    #[error("not a probe request")]
    NotProbeRequest,
    #[error("802.11 parse failed: {0}")]
    Frame(String),
}

/// A decoded probe request, ready for fingerprinting and persistence.
#[derive(Debug, Clone)]
pub struct ProbeFrame {
    /// Transmitter address, lowercase colon-separated.
    pub source_mac: String,
    pub ssid: String,
    pub dbm: i32,
    pub channel: u8,
    /// Information elements in on-air order.
    pub ies: Vec<InformationElement>,
}

/// Decode a captured packet into a probe request.
///
/// Non-probe-request frames come back as `DecodeError::NotProbeRequest` so
/// the caller can discard them without logging.
pub fn parse_probe_request(data: &[u8]) -> Result<ProbeFrame, DecodeError> {
    let rt = if data.len() > 4 && data[0] == 0 {
        radiotap::parse(data).ok_or(DecodeError::TruncatedRadiotap)?
    } else {
        Radiotap::default()
    };

    let frame_data = &data[rt.len..];
    if frame_data.len() < 24 {
        return Err(DecodeError::TruncatedFrame);
    }

    // false = no FCS at the end of the buffer
    let source_mac = match parse_frame(frame_data, false) {
        Ok(Frame::ProbeRequest(probe_req)) => format_mac(&probe_req.header.address_2),
        Ok(_) => {
            trace!("Non-probe-request frame received");
            return Err(DecodeError::NotProbeRequest);
        }
        Err(e) => return Err(DecodeError::Frame(format!("{:?}", e))),
    };

    // Management header is 24 bytes; elements follow.
    let ies = walk_elements(&frame_data[24..]);
    let ssid = ssid_label(&ies);

    trace!("Parsed probe request: MAC={}, SSID={:?}", source_mac, ssid);

    Ok(ProbeFrame {
        source_mac,
        ssid,
        dbm: rt.dbm(),
        channel: rt.channel(),
        ies,
    })
}

/// Ordered TLV walk over the management frame body. A truncated trailing
/// element ends the walk; everything before it is kept.
fn walk_elements(mut body: &[u8]) -> Vec<InformationElement> {
    let mut ies = Vec::new();
    while body.len() >= 2 {
        let id = body[0];
        let len = body[1];
        let end = 2 + len as usize;
        if body.len() < end {
            break;
        }
        ies.push(InformationElement {
            id,
            len,
            data: body[2..end].to_vec(),
        });
        body = &body[end..];
    }
    ies
}

/// The SSID element decoded per the sighting contract: lossy UTF-8, with an
/// absent, empty, or NUL-containing payload collapsing to `Undirected Probe`.
fn ssid_label(ies: &[InformationElement]) -> String {
    match ies.iter().find(|ie| ie.id == 0) {
        Some(ie) if !ie.data.is_empty() && !ie.data.contains(&0) => {
            String::from_utf8_lossy(&ie.data).to_string()
        }
        _ => UNDIRECTED_PROBE.to_string(),
    }
}

fn format_mac(mac: &MacAddress) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac.0[0], mac.0[1], mac.0[2], mac.0[3], mac.0[4], mac.0[5]
    )
}

/// Synthetic frame builders shared by the decoder and engine tests.
#[cfg(test)]
pub(crate) mod testframes {
    /// Radiotap header carrying channel frequency and dBm antenna signal.
    pub fn radiotap(freq: u16, dbm: i8) -> Vec<u8> {
        let present: u32 = (1 << 3) | (1 << 5);
        let mut h = vec![0u8, 0, 13, 0];
        h.extend_from_slice(&present.to_le_bytes());
        h.extend_from_slice(&freq.to_le_bytes());
        h.extend_from_slice(&[0, 0]);
        h.push(dbm as u8);
        h
    }

    /// 802.11 probe request: broadcast RA/BSSID, given transmitter and body.
    pub fn probe_request(mac: [u8; 6], ies: &[(u8, &[u8])]) -> Vec<u8> {
        let mut f = vec![0x40, 0x00, 0x00, 0x00]; // frame control + duration
        f.extend_from_slice(&[0xff; 6]); // addr1
        f.extend_from_slice(&mac); // addr2
        f.extend_from_slice(&[0xff; 6]); // addr3
        f.extend_from_slice(&[0x00, 0x00]); // sequence control
        for (id, data) in ies {
            f.push(*id);
            f.push(data.len() as u8);
            f.extend_from_slice(data);
        }
        f
    }

    /// Full packet: radiotap header followed by the probe request frame.
    pub fn packet(freq: u16, dbm: i8, mac: [u8; 6], ies: &[(u8, &[u8])]) -> Vec<u8> {
        let mut p = radiotap(freq, dbm);
        p.extend_from_slice(&probe_request(mac, ies));
        p
    }

    pub const RATES: &[u8] = &[0x82, 0x84, 0x8b, 0x96, 0x0c, 0x12, 0x18, 0x24];
    pub const HT_CAPS: &[u8] = &[
        0x2d, 0x01, 0x03, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
}
