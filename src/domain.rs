use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// one temperature/humidity sample as produced by the backend
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SensorReading {
    /// backend-assigned, unique and increasing
    pub id: u64,

    /// backend-formatted point in time, only used as a display key
    pub timestamp: String,

    /// degrees celsius
    pub temperature: f64,

    /// relative humidity (0-100%)
    pub humidity: f64,
}

/// the four relays wired to the backend
///
/// the set is fixed; there is no way to add or remove a relay at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayId {
    Relay1,
    Relay2,
    Relay3,
    Relay4,
}

impl RelayId {
    pub const ALL: [RelayId; 4] = [RelayId::Relay1, RelayId::Relay2, RelayId::Relay3, RelayId::Relay4];

    /// wire key used in the relay status/update bodies
    pub fn key(self) -> &'static str {
        match self {
            RelayId::Relay1 => "relay1",
            RelayId::Relay2 => "relay2",
            RelayId::Relay3 => "relay3",
            RelayId::Relay4 => "relay4",
        }
    }

    /// human name of the actuator behind the relay
    pub fn name(self) -> &'static str {
        match self {
            RelayId::Relay1 => "Heater",
            RelayId::Relay2 => "Freezer",
            RelayId::Relay3 => "Light",
            RelayId::Relay4 => "Fan",
        }
    }

    /// icon name the presentation layer renders next to the switch
    pub fn icon(self) -> &'static str {
        match self {
            RelayId::Relay1 => "thermometer",
            RelayId::Relay2 => "snowflake",
            RelayId::Relay3 => "lightbulb",
            RelayId::Relay4 => "fan",
        }
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for RelayId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelayId::ALL
            .into_iter()
            .find(|id| id.key() == s)
            .ok_or_else(|| format!("unknown relay '{}'", s))
    }
}

/// engaged/disengaged state of every relay
///
/// serializes to exactly `{"relay1":..,"relay2":..,"relay3":..,"relay4":..}`,
/// which is both the status response and the update request body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayState {
    pub relay1: bool,
    pub relay2: bool,
    pub relay3: bool,
    pub relay4: bool,
}

impl RelayState {
    pub fn get(&self, id: RelayId) -> bool {
        match id {
            RelayId::Relay1 => self.relay1,
            RelayId::Relay2 => self.relay2,
            RelayId::Relay3 => self.relay3,
            RelayId::Relay4 => self.relay4,
        }
    }

    pub fn set(&mut self, id: RelayId, engaged: bool) {
        let slot = match id {
            RelayId::Relay1 => &mut self.relay1,
            RelayId::Relay2 => &mut self.relay2,
            RelayId::Relay3 => &mut self.relay3,
            RelayId::Relay4 => &mut self.relay4,
        };
        *slot = engaged;
    }

    /// copy of this mapping with one relay flipped
    pub fn flipped(&self, id: RelayId) -> Self {
        let mut next = *self;
        next.set(id, !self.get(id));
        next
    }

    pub fn iter(&self) -> impl Iterator<Item = (RelayId, bool)> + '_ {
        RelayId::ALL.into_iter().map(move |id| (id, self.get(id)))
    }
}
