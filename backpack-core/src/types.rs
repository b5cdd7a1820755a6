//! Core domain types for backpacktrack
//!
//! These types are the values collaborators hand to the store (fixes,
//! classifications, weather observations) and the rows the store hands back.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Trackpoint** | A location sample with no user-assigned label |
//! | **Waypoint** | A location sample with a user-assigned label |
//! | **Day bucket** | An aggregate row keyed by local midnight (steps, activity duration) |
//! | **Open interval** | An activity log entry whose `finish` equals the next sample's `time` for the same activity |
//!
//! All timestamps are milliseconds since the Unix epoch.

use chrono::{Duration, Local, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Activity classification
// ============================================

/// Activity kinds reported by the platform classifier.
///
/// Codes match the classifier's integer constants so stored rows stay
/// readable by older releases. Codes this build does not know are carried
/// through as [`ActivityKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    InVehicle,
    OnBicycle,
    OnFoot,
    Still,
    Unknown,
    Tilting,
    Walking,
    Running,
    Other(i32),
}

impl ActivityKind {
    /// Integer code stored in the database
    pub fn code(&self) -> i32 {
        match self {
            ActivityKind::InVehicle => 0,
            ActivityKind::OnBicycle => 1,
            ActivityKind::OnFoot => 2,
            ActivityKind::Still => 3,
            ActivityKind::Unknown => 4,
            ActivityKind::Tilting => 5,
            ActivityKind::Walking => 7,
            ActivityKind::Running => 8,
            ActivityKind::Other(code) => *code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ActivityKind::InVehicle,
            1 => ActivityKind::OnBicycle,
            2 => ActivityKind::OnFoot,
            3 => ActivityKind::Still,
            4 => ActivityKind::Unknown,
            5 => ActivityKind::Tilting,
            7 => ActivityKind::Walking,
            8 => ActivityKind::Running,
            other => ActivityKind::Other(other),
        }
    }

    /// Day-bucket counter this activity accrues into.
    ///
    /// ON_FOOT and WALKING share the walking counter; anything the buckets
    /// have no column for lands in `unknown`.
    pub fn duration_column(&self) -> DurationColumn {
        match self {
            ActivityKind::Still => DurationColumn::Still,
            ActivityKind::OnFoot | ActivityKind::Walking => DurationColumn::Walking,
            ActivityKind::Running => DurationColumn::Running,
            ActivityKind::OnBicycle => DurationColumn::OnBicycle,
            ActivityKind::InVehicle => DurationColumn::InVehicle,
            ActivityKind::Unknown | ActivityKind::Tilting | ActivityKind::Other(_) => {
                DurationColumn::Unknown
            }
        }
    }
}

/// The six counters of an activity-duration bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationColumn {
    Still,
    Walking,
    Running,
    OnBicycle,
    InVehicle,
    Unknown,
}

impl DurationColumn {
    pub const ALL: [DurationColumn; 6] = [
        DurationColumn::Still,
        DurationColumn::Walking,
        DurationColumn::Running,
        DurationColumn::OnBicycle,
        DurationColumn::InVehicle,
        DurationColumn::Unknown,
    ];

    /// Column name in the `activityduration` table
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationColumn::Still => "still",
            DurationColumn::Walking => "walking",
            DurationColumn::Running => "running",
            DurationColumn::OnBicycle => "onbicycle",
            DurationColumn::InVehicle => "invehicle",
            DurationColumn::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DurationColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Location
// ============================================

/// A raw location fix from a location provider.
///
/// Optional measurements are `None` when the provider had no value for them
/// (no altitude fix, no bearing while stationary, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub time: i64,
    /// Provider name ("gps", "network", "fused")
    pub provider: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f32>,
    pub bearing: Option<f32>,
    pub accuracy: Option<f32>,
}

impl LocationFix {
    pub fn new(time: i64, provider: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            time,
            provider: provider.into(),
            latitude,
            longitude,
            altitude: None,
            speed: None,
            bearing: None,
            accuracy: None,
        }
    }
}

/// Activity and step state recorded alongside a location sample.
///
/// Negative values are the collaborators' "unknown" sentinel and are stored
/// as NULL, same as `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub activity_type: Option<i32>,
    pub confidence: Option<i32>,
    pub step_count: Option<i64>,
}

impl ActivitySnapshot {
    pub(crate) fn activity_type(&self) -> Option<i32> {
        self.activity_type.filter(|v| *v >= 0)
    }

    pub(crate) fn confidence(&self) -> Option<i32> {
        self.confidence.filter(|v| *v >= 0)
    }

    pub(crate) fn step_count(&self) -> Option<i64> {
        self.step_count.filter(|v| *v >= 0)
    }
}

/// A stored location sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: i64,
    pub time: i64,
    pub provider: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f32>,
    pub bearing: Option<f32>,
    pub accuracy: Option<f32>,
    /// Waypoint label; `None` for trackpoints
    pub name: Option<String>,
    pub activity_type: Option<i32>,
    pub activity_confidence: Option<i32>,
    pub step_count: Option<i64>,
}

impl LocationRecord {
    pub fn is_waypoint(&self) -> bool {
        self.name.is_some()
    }
}

// ============================================
// Activity
// ============================================

/// One raw classifier callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTypeRecord {
    pub id: i64,
    pub time: i64,
    pub activity: ActivityKind,
    /// 0..=100
    pub confidence: i32,
}

/// Cumulative milliseconds per activity for one local day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityDuration {
    pub id: i64,
    /// Local midnight
    pub day: i64,
    pub still: i64,
    pub walking: i64,
    pub running: i64,
    pub onbicycle: i64,
    pub invehicle: i64,
    pub unknown: i64,
}

impl ActivityDuration {
    pub fn get(&self, column: DurationColumn) -> i64 {
        match column {
            DurationColumn::Still => self.still,
            DurationColumn::Walking => self.walking,
            DurationColumn::Running => self.running,
            DurationColumn::OnBicycle => self.onbicycle,
            DurationColumn::InVehicle => self.invehicle,
            DurationColumn::Unknown => self.unknown,
        }
    }

    pub fn total(&self) -> i64 {
        DurationColumn::ALL.iter().map(|c| self.get(*c)).sum()
    }
}

/// A contiguous interval of a single activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: i64,
    pub start: i64,
    pub finish: i64,
    pub activity: ActivityKind,
}

impl ActivityLogEntry {
    pub fn duration_ms(&self) -> i64 {
        self.finish - self.start
    }
}

/// How a day bucket was touched by a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketChange {
    /// A new bucket row was inserted for the day
    Created,
    /// An existing bucket was incremented
    Updated,
    /// The bucket existed and nothing was added
    Unchanged,
}

/// Outcome of [`crate::Database::update_activity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityUpdate {
    pub day: i64,
    pub column: DurationColumn,
    pub bucket: BucketChange,
    /// Counter value after the write
    pub total: i64,
    /// Log interval after the write
    pub interval: ActivityLogEntry,
    /// True when an open interval was extended rather than a new one inserted
    pub extended: bool,
}

// ============================================
// Steps
// ============================================

/// Cumulative step count for one local day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepBucket {
    pub id: i64,
    /// Local midnight
    pub day: i64,
    pub count: i64,
}

/// Outcome of [`crate::Database::update_steps`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepUpdate {
    pub day: i64,
    pub count: i64,
    pub created: bool,
}

// ============================================
// Weather
// ============================================

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A weather report as fetched from an observation network.
///
/// Measurements the station did not report are `None` (NaN is treated the
/// same way).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub time: i64,
    pub station_id: i64,
    pub station_type: i32,
    pub station_name: Option<String>,
    pub station_location: Coordinates,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
}

/// A stored weather observation.
///
/// Locations are optional because rows carried over from old schema
/// versions may lack them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub id: i64,
    pub time: i64,
    pub station_id: i64,
    pub station_type: i32,
    pub station_name: Option<String>,
    pub station_location: Option<Coordinates>,
    pub observer_location: Option<Coordinates>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    /// When the row was inserted (not the observation time)
    pub created: Option<i64>,
}

// ============================================
// Time helpers
// ============================================

/// Local midnight of the day containing `ms`.
///
/// On days where local midnight does not exist (DST jumps at 00:00) the
/// first valid instant of the day is used.
pub fn day_start(ms: i64) -> i64 {
    let Some(instant) = Utc.timestamp_millis_opt(ms).single() else {
        return ms;
    };
    let midnight = instant
        .with_timezone(&Local)
        .date_naive()
        .and_time(NaiveTime::MIN);

    Local
        .from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            Local
                .from_local_datetime(&(midnight + Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(ms)
}

/// Current local offset from UTC in milliseconds (east positive).
pub fn local_utc_offset_ms() -> i64 {
    i64::from(Local::now().offset().local_minus_utc()) * 1000
}

/// Current time in milliseconds since the epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
