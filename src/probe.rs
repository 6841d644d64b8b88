use crate::database::SightingRecord;
use crate::fingerprint::NO_STABLE_IES;

/// One decoded, attributed probe request on its way to the store, the
/// broker, and the probe log.
#[derive(Debug, Clone)]
pub struct Probe {
    /// UTC, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    pub dbm: i32,
    pub channel: u8,
    /// Lowercase colon-separated transmitter address.
    pub mac: String,
    pub oui: String,
    pub ssid: String,
    /// 16-hex fingerprint or the `no_stable_ies` sentinel.
    pub ie_fingerprint: String,
    /// JSON dump of every element on the frame.
    pub ie_data: Option<String>,
}

impl Probe {
    /// Payload published to the probe topic for live consumers.
    pub fn mqtt_json(&self) -> String {
        serde_json::json!({
            "timestamp": self.timestamp,
            "rssi": self.dbm,
            "channel": self.channel,
            "MAC": self.mac,
            "clientOUI": self.oui,
            "SSID": self.ssid,
        })
        .to_string()
    }

    /// CSV line for the probe log:
    /// `2024-04-04 14:00:26,-77 dBm,Ch: 8,e2:1d:5e:17:3f:0d,Locally Assigned,Red Sox-2.4`
    pub fn to_csv(&self) -> String {
        format!(
            "{},{} dBm,Ch: {},{},{},{}",
            self.timestamp, self.dbm, self.channel, self.mac, self.oui, self.ssid
        )
    }

    /// Storage DTO; the fingerprint sentinel collapses to None so the
    /// sighting row carries NULL when no stable elements were present.
    pub fn to_sighting(&self) -> SightingRecord {
        let ie_fingerprint = if self.ie_fingerprint == NO_STABLE_IES {
            None
        } else {
            Some(self.ie_fingerprint.clone())
        };
        SightingRecord {
            mac: self.mac.clone(),
            dbm: self.dbm,
            ssid: self.ssid.clone(),
            oui: self.oui.clone(),
            ie_fingerprint,
            ie_data: self.ie_data.clone(),
        }
    }
}
