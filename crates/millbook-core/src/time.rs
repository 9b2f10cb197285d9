//! Calendar date ranges used by every analytics view
//!
//! Boundaries are wall-clock times in the mill's configured offset. `from` is
//! the first millisecond of the range and `to` is inclusive, normalized to
//! 23:59:59.999 for calendar kinds. Weeks start on Sunday.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc,
};
use millbook_config::{TimeRange, TimeRangeConfig};
use serde::{Deserialize, Serialize};

/// Month names for the month drill-down, January first
pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Kind of a resolved range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeKind {
    Day,
    Week,
    Month,
    Year,
    Custom,
}

/// How custom range endpoints are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// Snap to start and end of the selected days
    WholeDays,
    /// Use the selected instants as-is
    Exact,
}

/// A resolved `{kind, from, to}` range with `from <= to`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub kind: RangeKind,
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

impl DateRange {
    /// Check if a wall-clock time falls inside the range (both ends inclusive)
    pub fn contains(&self, at: &NaiveDateTime) -> bool {
        *at >= self.from && *at <= self.to
    }

    /// Human-readable description
    pub fn description(&self) -> String {
        match self.kind {
            RangeKind::Day => self.from.format("%d %b %Y").to_string(),
            RangeKind::Week => format!(
                "Week of {}",
                self.from.format("%d %b %Y")
            ),
            RangeKind::Month => self.from.format("%B %Y").to_string(),
            RangeKind::Year => self.from.format("%Y").to_string(),
            RangeKind::Custom => format!(
                "{} to {}",
                self.from.format("%Y-%m-%d"),
                self.to.format("%Y-%m-%d")
            ),
        }
    }
}

/// First millisecond of a day
pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// Last millisecond of a day (23:59:59.999)
pub fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    start_of_day(date) + Duration::days(1) - Duration::milliseconds(1)
}

/// Last calendar day of a month, taken as day 0 of the following month
pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).and_then(|d| d.pred_opt())
}

fn whole_days(kind: RangeKind, first: NaiveDate, last: NaiveDate) -> DateRange {
    DateRange {
        kind,
        from: start_of_day(first),
        to: end_of_day(last),
    }
}

/// Today's range
pub fn day(now: NaiveDateTime) -> DateRange {
    let today = now.date();
    whole_days(RangeKind::Day, today, today)
}

/// Sunday-started week containing `now`
pub fn week(now: NaiveDateTime) -> DateRange {
    let today = now.date();
    let sunday = today - Duration::days(i64::from(today.weekday().num_days_from_sunday()));
    whole_days(RangeKind::Week, sunday, sunday + Duration::days(6))
}

/// Calendar month containing `now`
pub fn month(now: NaiveDateTime) -> DateRange {
    let today = now.date();
    let first = today.with_day(1).unwrap_or(today);
    let last = last_day_of_month(today.year(), today.month()).unwrap_or(today);
    whole_days(RangeKind::Month, first, last)
}

/// Calendar year containing `now`
pub fn year(now: NaiveDateTime) -> DateRange {
    let today = now.date();
    let first = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today);
    let last = NaiveDate::from_ymd_opt(today.year(), 12, 31).unwrap_or(today);
    whole_days(RangeKind::Year, first, last)
}

/// Range spanning two points in either order
pub fn custom(a: NaiveDateTime, b: NaiveDateTime, precision: Precision) -> DateRange {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    match precision {
        Precision::WholeDays => whole_days(RangeKind::Custom, lo.date(), hi.date()),
        Precision::Exact => DateRange {
            kind: RangeKind::Custom,
            from: lo,
            to: hi,
        },
    }
}

/// Resolve a quick range relative to `now`; `All` has no bounds
pub fn resolve(range: TimeRange, now: NaiveDateTime) -> Option<DateRange> {
    match range {
        TimeRange::Day => Some(day(now)),
        TimeRange::Week => Some(week(now)),
        TimeRange::Month => Some(month(now)),
        TimeRange::Year => Some(year(now)),
        TimeRange::All => None,
    }
}

// ==================== Drill-down ====================

/// Number of 7-day strides from the 1st until the month ends
pub fn weeks_in_month(reference: NaiveDate) -> usize {
    let days = last_day_of_month(reference.year(), reference.month())
        .map(|d| d.day())
        .unwrap_or(31);
    ((days + 6) / 7) as usize
}

/// Week labels for the reference month
pub fn week_labels(reference: NaiveDate) -> Vec<String> {
    (1..=weeks_in_month(reference))
        .map(|i| format!("Week {}", i))
        .collect()
}

/// The most recent `count` calendar years, current year first
pub fn recent_years(reference: NaiveDate, count: u32) -> Vec<i32> {
    (0..count as i32).map(|i| reference.year() - i).collect()
}

/// Month range for an explicit year and 1-based month
pub fn month_of(year: i32, month_number: u32) -> Option<DateRange> {
    let first = NaiveDate::from_ymd_opt(year, month_number, 1)?;
    Some(month(start_of_day(first)))
}

/// Week range for the `index`-th (0-based) stride of the reference month.
///
/// The week is the Sunday-aligned week containing day `1 + 7·index`, so
/// trailing days past the last stride's week are not covered: a 31-day month
/// starting on a Saturday leaves the 30th and 31st outside every drill-down
/// week. Use the month range to include them.
pub fn week_of_month(reference: NaiveDate, index: usize) -> Option<DateRange> {
    if index >= weeks_in_month(reference) {
        return None;
    }
    let first = reference.with_day(1)?;
    Some(week(start_of_day(first + Duration::days(7 * index as i64))))
}

/// Year range for an explicit year
pub fn year_of(year_number: i32) -> Option<DateRange> {
    let first = NaiveDate::from_ymd_opt(year_number, 1, 1)?;
    Some(year(start_of_day(first)))
}

// ==================== Filtering ====================

/// Which end of a range a parsed bound belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Start,
    End,
}

/// Parse a bound; date-only input snaps to the start or end of that day.
///
/// Returns `None` for absent or unparsable input so the bound is open.
pub fn parse_bound(input: Option<&str>, bound: Bound) -> Option<NaiveDateTime> {
    let s = input?.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(match bound {
            Bound::Start => start_of_day(date),
            Bound::End => end_of_day(date),
        });
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    None
}

/// Optional bounds applied to entry instants; open bounds match everything
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateFilter {
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
    pub offset: FixedOffset,
}

impl Default for DateFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl DateFilter {
    /// Filter with no bounds
    pub fn all() -> Self {
        Self {
            from: None,
            to: None,
            offset: Utc.fix(),
        }
    }

    /// Filter from a resolved range
    pub fn from_range(range: &DateRange) -> Self {
        Self {
            from: Some(range.from),
            to: Some(range.to),
            offset: Utc.fix(),
        }
    }

    /// Filter from raw bound strings, ignoring unparsable input
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Self {
        Self {
            from: parse_bound(from, Bound::Start),
            to: parse_bound(to, Bound::End),
            offset: Utc.fix(),
        }
    }

    /// Evaluate instants in the given offset
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Whether neither bound is set
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// Check if a wall-clock time is within the bounds
    pub fn contains(&self, at: &NaiveDateTime) -> bool {
        match (self.from, self.to) {
            (None, None) => true,
            (Some(s), None) => *at >= s,
            (None, Some(e)) => *at <= e,
            (Some(s), Some(e)) => *at >= s && *at <= e,
        }
    }

    /// Check an optional instant.
    ///
    /// Undated entries only match an unbounded filter; a bounded window
    /// cannot place them, so they are left out of day/week/month/year views.
    pub fn contains_instant(&self, instant: Option<&DateTime<Utc>>) -> bool {
        match instant {
            Some(at) => self.contains(&at.with_timezone(&self.offset).naive_local()),
            None => self.is_unbounded(),
        }
    }
}

/// Clock and offset for the mill's local calendar
#[derive(Debug, Clone, Copy)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Default for Calendar {
    fn default() -> Self {
        Self { offset: Utc.fix() }
    }
}

impl Calendar {
    /// Calendar for a fixed offset in minutes east of UTC
    pub fn new(utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn from_config(config: &TimeRangeConfig) -> Self {
        Self::new(config.utc_offset_minutes)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Current local wall-clock time
    pub fn now(&self) -> NaiveDateTime {
        self.local(&Utc::now())
    }

    /// Convert an instant to local wall-clock time
    pub fn local(&self, instant: &DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.offset).naive_local()
    }

    /// Filter for an optional range in this calendar's offset
    pub fn filter(&self, range: Option<&DateRange>) -> DateFilter {
        range
            .map(DateFilter::from_range)
            .unwrap_or_else(DateFilter::all)
            .with_offset(self.offset)
    }
}

// ==================== Custom range picker ====================

/// Picker state: `Idle → AwaitingSecondPoint → Resolved`, cancel returns to `Idle`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PickerState {
    Idle,
    AwaitingSecondPoint { pending: NaiveDateTime },
    Resolved(DateRange),
}

/// Two-step custom range selection over an active range.
///
/// The active range only changes when a selection completes, so cancelling
/// mid-selection leaves the previous range in place.
#[derive(Debug, Clone)]
pub struct RangePicker {
    active: Option<DateRange>,
    state: PickerState,
    precision: Precision,
}

impl RangePicker {
    pub fn new(active: Option<DateRange>, precision: Precision) -> Self {
        Self {
            active,
            state: PickerState::Idle,
            precision,
        }
    }

    /// Currently applied range; `None` means no bounds
    pub fn active(&self) -> Option<&DateRange> {
        self.active.as_ref()
    }

    pub fn state(&self) -> &PickerState {
        &self.state
    }

    /// Apply a quick range in a single step
    pub fn select_quick(&mut self, range: TimeRange, now: NaiveDateTime) -> Option<DateRange> {
        self.active = resolve(range, now);
        self.state = PickerState::Idle;
        self.active
    }

    /// Apply an already resolved range (drill-down selections)
    pub fn select(&mut self, range: DateRange) {
        self.active = Some(range);
        self.state = PickerState::Resolved(range);
    }

    /// Record a tap; the second tap emits the combined range
    pub fn tap(&mut self, point: NaiveDateTime) -> Option<DateRange> {
        match self.state {
            PickerState::AwaitingSecondPoint { pending } => {
                let range = custom(pending, point, self.precision);
                self.active = Some(range);
                self.state = PickerState::Resolved(range);
                Some(range)
            }
            PickerState::Idle | PickerState::Resolved(_) => {
                self.state = PickerState::AwaitingSecondPoint { pending: point };
                None
            }
        }
    }

    /// Abandon a half-made selection
    pub fn cancel(&mut self) {
        self.state = PickerState::Idle;
    }
}
