//! Per-model device capabilities.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Sentinel slot id: the device reported a preset outside the known range.
pub const SLOT_INVALID: i32 = -1;

/// Model name of the fallback profile.
pub const DEFAULT_MODEL: &str = "default";

/// A preset slot offered by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    /// Preset id on the wire
    pub id: u8,
    /// Name shown to the user
    pub name: String,
}

impl SlotInfo {
    fn new(id: u8, name: &str) -> Self {
        Self { id, name: name.to_string() }
    }
}

/// Capabilities of one device model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Model name, matched exactly against the HID product name
    pub model: String,
    /// Lowest gain the device accepts, in dB
    #[serde(default = "default_min_gain")]
    pub min_gain_db: f64,
    /// Highest gain the device accepts, in dB
    #[serde(default = "default_max_gain")]
    pub max_gain_db: f64,
    /// Number of PEQ bands
    #[serde(default = "default_max_filters")]
    pub max_filters: u8,
    /// Position in `available_slots` of the first user-writable slot
    #[serde(default)]
    pub first_writable_slot: Option<u8>,
    /// Number of user-writable slots
    #[serde(default)]
    pub max_writable_slots: u8,
    /// Whether saving makes the device drop the connection
    #[serde(default = "default_true")]
    pub disconnect_on_save: bool,
    /// Presets in display order
    #[serde(default)]
    pub available_slots: Vec<SlotInfo>,
}

fn default_min_gain() -> f64 {
    -12.0
}

fn default_max_gain() -> f64 {
    12.0
}

fn default_max_filters() -> u8 {
    5
}

fn default_true() -> bool {
    true
}

impl DeviceProfile {
    /// The conservative profile used for unknown models.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            min_gain_db: default_min_gain(),
            max_gain_db: default_max_gain(),
            max_filters: default_max_filters(),
            first_writable_slot: None,
            max_writable_slots: 0,
            disconnect_on_save: true,
            available_slots: Vec::new(),
        }
    }

    /// Slots the user may save into.
    #[must_use]
    pub fn writable_slots(&self) -> &[SlotInfo] {
        let Some(first) = self.first_writable_slot.map(usize::from) else {
            return &[];
        };
        let end = (first + usize::from(self.max_writable_slots)).min(self.available_slots.len());
        self.available_slots.get(first..end).unwrap_or(&[])
    }

    /// Whether a preset id can be written to.
    #[must_use]
    pub fn is_writable_slot(&self, id: u8) -> bool {
        self.writable_slots().iter().any(|slot| slot.id == id)
    }

    /// Display name of a preset id.
    #[must_use]
    pub fn slot_name(&self, id: u8) -> Option<&str> {
        self.available_slots.iter().find(|slot| slot.id == id).map(|slot| slot.name.as_str())
    }

    /// Map a reported preset id to a slot id, or [`SLOT_INVALID`].
    ///
    /// An id is valid if the profile lists it, or if it is strictly below the
    /// number of listed slots. Listed ids win over the count bound: user slots
    /// numbered above it (the RETRO NANO's 160-162) stay valid rather than
    /// reading back as [`SLOT_INVALID`].
    #[must_use]
    pub fn normalize_slot(&self, id: u8) -> i32 {
        let listed = self.available_slots.iter().any(|slot| slot.id == id);
        if listed || usize::from(id) < self.available_slots.len() {
            i32::from(id)
        } else {
            SLOT_INVALID
        }
    }

    /// Preset id that switches PEQ off. Expected to lie outside the real slot range.
    #[must_use]
    pub fn bypass_slot(&self) -> u8 {
        self.max_filters
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::fallback()
    }
}

/// Immutable table of device profiles keyed by model name.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    profiles: HashMap<String, DeviceProfile>,
    fallback: DeviceProfile,
}

impl DeviceRegistry {
    /// Registry holding the built-in models.
    #[must_use]
    pub fn builtin() -> Self {
        let profiles =
            builtin_profiles().into_iter().map(|profile| (profile.model.clone(), profile)).collect();
        Self { profiles, fallback: DeviceProfile::fallback() }
    }

    /// Add or replace profiles. A profile named `default` replaces the fallback.
    #[must_use]
    pub fn with_profiles(mut self, profiles: impl IntoIterator<Item = DeviceProfile>) -> Self {
        for profile in profiles {
            debug!(model = %profile.model, "Registering device profile");
            if profile.model == DEFAULT_MODEL {
                self.fallback = profile;
            } else {
                self.profiles.insert(profile.model.clone(), profile);
            }
        }
        self
    }

    /// Profile for a model name, or the fallback profile.
    #[must_use]
    pub fn lookup(&self, model: &str) -> &DeviceProfile {
        self.profiles.get(model).unwrap_or(&self.fallback)
    }

    /// Whether a model has its own profile.
    #[must_use]
    pub fn is_known(&self, model: &str) -> bool {
        self.profiles.contains_key(model)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn profile(
    model: &str,
    max_filters: u8,
    first_writable_slot: u8,
    max_writable_slots: u8,
    disconnect_on_save: bool,
    slots: &[(u8, &str)],
) -> DeviceProfile {
    DeviceProfile {
        model: model.to_string(),
        min_gain_db: -12.0,
        max_gain_db: 12.0,
        max_filters,
        first_writable_slot: Some(first_writable_slot),
        max_writable_slots,
        disconnect_on_save,
        available_slots: slots.iter().map(|&(id, name)| SlotInfo::new(id, name)).collect(),
    }
}

const TEN_BAND_SLOTS: &[(u8, &str)] = &[
    (0, "Jazz"),
    (1, "Pop"),
    (2, "Rock"),
    (3, "Dance"),
    (4, "R&B"),
    (5, "Classic"),
    (6, "Hip-hop"),
    (7, "USER1"),
    (8, "USER2"),
    (9, "USER3"),
];

fn builtin_profiles() -> Vec<DeviceProfile> {
    vec![
        profile(
            "FIIO KA17",
            10,
            7,
            3,
            false,
            &[
                (0, "Jazz"),
                (1, "Pop"),
                (2, "Rock"),
                (3, "Dance"),
                (5, "R&B"),
                (6, "Classic"),
                (7, "Hip-hop"),
                (4, "USER1"),
                (8, "USER2"),
                (9, "USER3"),
            ],
        ),
        profile(
            "JadeAudio JA11",
            5,
            3,
            1,
            true,
            &[(0, "Vocal"), (1, "Classic"), (2, "Bass"), (3, "USER1")],
        ),
        profile(
            "FIIO LS-TC2",
            5,
            3,
            1,
            true,
            &[
                (0, "Vocal"),
                (1, "Classic"),
                (2, "Bass"),
                (3, "Dance"),
                (4, "R&B"),
                (5, "Classic"),
                (6, "Hip-hop"),
                (160, "USER1"),
            ],
        ),
        profile(
            "FIIO RETRO NANO",
            5,
            3,
            1,
            true,
            &[
                (0, "Vocal"),
                (1, "Classic"),
                (2, "Bass"),
                (3, "Dance"),
                (4, "R&B"),
                (5, "Classic"),
                (6, "Hip-hop"),
                (160, "USER1"),
                (161, "USER2"),
                (162, "USER3"),
            ],
        ),
        profile("FIIO BTR13", 10, 7, 3, false, TEN_BAND_SLOTS),
        profile(
            "FIIO BTR17",
            10,
            7,
            3,
            false,
            &[
                (0, "Jazz"),
                (1, "Pop"),
                (2, "Rock"),
                (3, "Dance"),
                (4, "R&B"),
                (5, "Classic"),
                (6, "Hip-hop"),
                (160, "USER1"),
                (161, "USER2"),
                (162, "USER3"),
                (163, "USER4"),
                (164, "USER5"),
                (165, "USER6"),
                (166, "USER7"),
                (167, "USER8"),
                (168, "USER9"),
                (169, "USER10"),
            ],
        ),
        profile("FIIO KA15", 10, 7, 3, false, TEN_BAND_SLOTS),
    ]
}
