//! Alarm engine: notification reduction, snoozing, acknowledgement
//!
//! ## Overview
//!
//! Plugins do not emit alarms directly. Each cycle they *request*
//! notifications and snoozes; the engine reduces those requests into at
//! most one emitted event per group, honoring acknowledged and snoozed
//! state that persists across cycles.
//!
//! ## State machine
//!
//! Per `(level, group)` pair:
//!
//! ```text
//!            requestNotify        ack / snooze
//!   idle ──────────────▶ emitted ──────────────▶ acknowledged
//!    ▲                      │                        │
//!    │   condition clears   │                        │ silence expires
//!    ├──────────────────────┘ (auto-ack + all clear) │
//!    └───────────────────────────────────────────────┘
//! ```
//!
//! Alarms are created lazily on first reference and live for the engine's
//! lifetime. The engine is an explicit per-process/per-session instance,
//! never module-global state; tests reset it with
//! [`AlarmEngine::reset_for_tests`].
//!
//! Notifications at or below [`Level::Info`], and anything flagged as an
//! announcement, bypass the state machine entirely: they are emitted every
//! cycle and can never be snoozed.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::time::{mins_to_ms, Timestamp};

/// Default silence window applied by an ack that does not specify one.
pub const DEFAULT_SILENCE_MS: u64 = mins_to_ms(40);

/// Notification severity
///
/// Only `Warn` and `Urgent` participate in alarm state; everything at or
/// below `Info` is pass-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i8)]
pub enum Level {
    /// No severity; placeholder
    None = -3,
    /// Lowest-priority informational
    Lowest = -2,
    /// Low-priority informational
    Low = -1,
    /// Informational, emitted every cycle
    Info = 0,
    /// Warning alarm
    Warn = 1,
    /// Urgent alarm
    Urgent = 2,
}

impl Level {
    /// Display label used in default message building.
    pub fn label(&self) -> &'static str {
        match self {
            Level::None => "None",
            Level::Lowest => "Lowest",
            Level::Low => "Low",
            Level::Info => "Info",
            Level::Warn => "Warning",
            Level::Urgent => "Urgent",
        }
    }

    /// Whether this level participates in group alarm state.
    pub fn is_alarm(&self) -> bool {
        *self >= Level::Warn
    }
}

/// The group every request lands in unless it names another.
pub const DEFAULT_GROUP: &str = "default";

/// A plugin's request to raise a notification
#[derive(Debug, Clone, PartialEq)]
pub struct Notify {
    /// Severity
    pub level: Level,
    /// Short title, required
    pub title: String,
    /// Longer message, required
    pub message: String,
    /// Alarm group; requests in one group compete for a single emission
    pub group: String,
    /// Requesting plugin, for logs and debugging
    pub plugin: &'static str,
    /// Announcements bypass snoozing and group state entirely
    pub is_announcement: bool,
}

impl Notify {
    /// Build a request in the default group.
    pub fn new(level: Level, title: impl Into<String>, message: impl Into<String>, plugin: &'static str) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
            group: DEFAULT_GROUP.to_string(),
            plugin,
            is_announcement: false,
        }
    }

    /// Re-target the request at a named group.
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }
}

/// A plugin's request to suppress a group for a bounded duration
#[derive(Debug, Clone, PartialEq)]
pub struct Snooze {
    /// Levels at or below this are covered
    pub level: Level,
    /// Group to suppress
    pub group: String,
    /// Suppression length, milliseconds
    pub length_ms: u64,
    /// Requesting plugin
    pub plugin: &'static str,
}

impl Snooze {
    /// Build a snooze for the default group.
    pub fn new(level: Level, length_ms: u64, plugin: &'static str) -> Self {
        Self {
            level,
            group: DEFAULT_GROUP.to_string(),
            length_ms,
            plugin,
        }
    }
}

/// Per-cycle collector of requested notifications and snoozes
///
/// Validation happens at the request boundary: incomplete requests are
/// logged and dropped, and never enter the state machine.
#[derive(Debug, Default)]
pub struct NotificationRequests {
    notifies: Vec<Notify>,
    snoozes: Vec<Snooze>,
}

impl NotificationRequests {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a notification. Rejects requests missing a title, message
    /// or plugin name.
    pub fn request_notify(&mut self, notify: Notify) {
        if notify.title.is_empty() || notify.message.is_empty() || notify.plugin.is_empty() {
            warn!(
                "dropping incomplete notify request from `{}`: {:?}",
                notify.plugin, notify
            );
            return;
        }
        self.notifies.push(notify);
    }

    /// Request a snooze. Rejects non-positive lengths.
    pub fn request_snooze(&mut self, snooze: Snooze) {
        if snooze.length_ms == 0 {
            warn!(
                "dropping snooze request with zero length from `{}`",
                snooze.plugin
            );
            return;
        }
        self.snoozes.push(snooze);
    }

    /// Accepted notification requests this cycle.
    pub fn notifies(&self) -> &[Notify] {
        &self.notifies
    }

    /// Accepted snooze requests this cycle.
    pub fn snoozes(&self) -> &[Snooze] {
        &self.snoozes
    }
}

/// Persistent per-`(level, group)` alarm state
#[derive(Debug, Clone)]
pub struct Alarm {
    /// Severity this alarm tracks
    pub level: Level,
    /// Group this alarm belongs to
    pub group: String,
    /// Title of the last emitted notification
    pub label: String,
    /// When the alarm was last acknowledged
    pub last_ack_time: Timestamp,
    /// How long the last ack silences it
    pub silence_time: u64,
    /// Set while an emission is outstanding (not yet acknowledged)
    pub last_emit_time: Option<Timestamp>,
}

impl Alarm {
    fn new(level: Level, group: &str) -> Self {
        Self {
            level,
            group: group.to_string(),
            label: String::new(),
            last_ack_time: 0,
            silence_time: 0,
            last_emit_time: None,
        }
    }

    /// Whether an acknowledgement still covers `time`.
    pub fn is_silenced(&self, time: Timestamp) -> bool {
        self.last_ack_time + self.silence_time > time
    }
}

/// An event actually emitted to the notification transport
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmEvent {
    /// Severity
    pub level: Level,
    /// Group the event belongs to
    pub group: String,
    /// Title
    pub title: String,
    /// Message
    pub message: String,
    /// True for "all clear" events acknowledging a resolved condition
    pub clear: bool,
}

/// Reduces per-cycle requests into emitted alarm events
#[derive(Debug, Default)]
pub struct AlarmEngine {
    alarms: HashMap<(Level, String), Alarm>,
}

impl AlarmEngine {
    /// Create an engine with no alarm history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all alarm state. Test isolation only.
    pub fn reset_for_tests(&mut self) {
        self.alarms.clear();
    }

    /// Inspect the alarm for a `(level, group)` pair, if it exists.
    pub fn alarm(&self, level: Level, group: &str) -> Option<&Alarm> {
        self.alarms.get(&(level, group.to_string()))
    }

    fn alarm_entry(&mut self, level: Level, group: &str) -> &mut Alarm {
        self.alarms
            .entry((level, group.to_string()))
            .or_insert_with(|| Alarm::new(level, group))
    }

    /// Whether the `(level, group)` alarm is currently acknowledged.
    pub fn is_acked(&self, level: Level, group: &str, time: Timestamp) -> bool {
        self.alarm(level, group)
            .map(|a| a.is_silenced(time))
            .unwrap_or(false)
    }

    /// Acknowledge an alarm, silencing it for `silence_ms`.
    ///
    /// Re-silencing an alarm that is already silenced is a logged no-op:
    /// an accidental double-ack must not extend the window. Acknowledging
    /// `Urgent` implicitly acknowledges `Warn` for the same group.
    pub fn ack(&mut self, level: Level, group: &str, silence_ms: u64, time: Timestamp) {
        let silence_ms = if silence_ms == 0 {
            DEFAULT_SILENCE_MS
        } else {
            silence_ms
        };

        let alarm = self.alarm_entry(level, group);
        if alarm.is_silenced(time) {
            warn!(
                "ack for already-silenced alarm {:?}/{}, ignoring",
                level, group
            );
        } else {
            info!("acking {:?}/{} for {}ms", level, group, silence_ms);
            alarm.last_ack_time = time;
            alarm.silence_time = silence_ms;
            alarm.last_emit_time = None;
        }

        if level == Level::Urgent {
            self.ack(Level::Warn, group, silence_ms, time);
        }
    }

    /// Reduce this cycle's requests into emitted events.
    ///
    /// Emits at most one alarm event per group, plus pass-through events
    /// for announcements and levels at or below `Info`.
    pub fn process(&mut self, requests: &NotificationRequests, time: Timestamp) -> Vec<AlarmEvent> {
        let mut events = Vec::new();

        // Pass-through lane: announcements and informational levels
        for notify in requests.notifies() {
            if notify.is_announcement || !notify.level.is_alarm() {
                events.push(AlarmEvent {
                    level: notify.level,
                    group: notify.group.clone(),
                    title: notify.title.clone(),
                    message: notify.message.clone(),
                    clear: false,
                });
            }
        }

        // Every group seen this cycle or carrying historical alarm state
        let mut groups: Vec<String> = requests
            .notifies()
            .iter()
            .filter(|n| n.level.is_alarm() && !n.is_announcement)
            .map(|n| n.group.clone())
            .chain(self.alarms.keys().map(|(_, g)| g.clone()))
            .collect();
        groups.sort();
        groups.dedup();

        for group in groups {
            if let Some(event) = self.process_group(requests, &group, time) {
                events.push(event);
            }
        }

        events
    }

    fn process_group(
        &mut self,
        requests: &NotificationRequests,
        group: &str,
        time: Timestamp,
    ) -> Option<AlarmEvent> {
        let highest = requests
            .notifies()
            .iter()
            .filter(|n| {
                n.level.is_alarm()
                    && !n.is_announcement
                    && n.group == group
                    && !self.is_acked(n.level, group, time)
            })
            .max_by_key(|n| n.level);

        let Some(highest) = highest else {
            return self.auto_ack(group, time);
        };

        // A snooze of equal-or-greater level suppresses the whole group
        let snoozed_by = requests
            .snoozes()
            .iter()
            .filter(|s| s.group == group && s.level >= highest.level)
            .max_by_key(|s| s.length_ms);

        if let Some(snooze) = snoozed_by {
            debug!(
                "snoozing {:?}/{} for {}ms at `{}`'s request",
                highest.level, group, snooze.length_ms, snooze.plugin
            );
            self.ack(snooze.level, group, snooze.length_ms, time);
            return None;
        }

        let alarm = self.alarm_entry(highest.level, group);
        alarm.last_emit_time = Some(time);
        alarm.label = highest.title.clone();
        Some(AlarmEvent {
            level: highest.level,
            group: group.to_string(),
            title: highest.title.clone(),
            message: highest.message.clone(),
            clear: false,
        })
    }

    /// The triggering condition cleared without user action: acknowledge
    /// any outstanding emission with a 1ms silence and send an all clear.
    fn auto_ack(&mut self, group: &str, time: Timestamp) -> Option<AlarmEvent> {
        let mut cleared = false;
        for level in [Level::Warn, Level::Urgent] {
            let outstanding = self
                .alarm(level, group)
                .map(|a| a.last_emit_time.is_some())
                .unwrap_or(false);
            if outstanding {
                info!("auto-acking {:?}/{}", level, group);
                self.ack(level, group, 1, time);
                cleared = true;
            }
        }

        cleared.then(|| AlarmEvent {
            level: Level::Info,
            group: group.to_string(),
            title: "All Clear".to_string(),
            message: "Alarm condition resolved".to_string(),
            clear: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warn_request() -> Notify {
        Notify::new(Level::Warn, "High BG", "BG is 190", "test")
    }

    fn urgent_request() -> Notify {
        Notify::new(Level::Urgent, "Urgent High BG", "BG is 280", "test")
    }

    #[test]
    fn incomplete_requests_are_dropped() {
        let mut requests = NotificationRequests::new();
        requests.request_notify(Notify::new(Level::Warn, "", "message", "test"));
        requests.request_notify(Notify::new(Level::Warn, "title", "", "test"));
        requests.request_snooze(Snooze::new(Level::Warn, 0, "test"));

        assert!(requests.notifies().is_empty());
        assert!(requests.snoozes().is_empty());
    }

    #[test]
    fn highest_level_wins_per_group() {
        let mut engine = AlarmEngine::new();
        let mut requests = NotificationRequests::new();
        requests.request_notify(warn_request());
        requests.request_notify(urgent_request());

        let events = engine.process(&requests, 1000);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::Urgent);
    }

    #[test]
    fn at_most_one_event_per_group_per_cycle() {
        let mut engine = AlarmEngine::new();
        let mut requests = NotificationRequests::new();
        requests.request_notify(warn_request());
        requests.request_notify(warn_request().in_group("pump"));
        requests.request_notify(urgent_request().in_group("pump"));

        let mut events = engine.process(&requests, 1000);
        events.sort_by(|a, b| a.group.cmp(&b.group));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].group, DEFAULT_GROUP);
        assert_eq!(events[1].group, "pump");
        assert_eq!(events[1].level, Level::Urgent);
    }

    #[test]
    fn ack_silences_until_expiry() {
        let mut engine = AlarmEngine::new();
        let mut requests = NotificationRequests::new();
        requests.request_notify(urgent_request());

        assert_eq!(engine.process(&requests, 1000).len(), 1);

        engine.ack(Level::Urgent, DEFAULT_GROUP, 60_000, 1000);

        // Within the silence window nothing is emitted
        assert!(engine.process(&requests, 30_000).is_empty());
        // After expiry the alarm fires again
        assert_eq!(engine.process(&requests, 62_000).len(), 1);
    }

    #[test]
    fn urgent_ack_covers_warn() {
        let mut engine = AlarmEngine::new();
        engine.ack(Level::Urgent, DEFAULT_GROUP, 60_000, 1000);

        assert!(engine.is_acked(Level::Warn, DEFAULT_GROUP, 2000));

        let mut requests = NotificationRequests::new();
        requests.request_notify(warn_request());
        assert!(engine.process(&requests, 2000).is_empty());
    }

    #[test]
    fn double_ack_is_a_noop() {
        let mut engine = AlarmEngine::new();
        engine.ack(Level::Warn, DEFAULT_GROUP, 60_000, 1000);
        // Second ack at t=30s must not extend the window to 90s
        engine.ack(Level::Warn, DEFAULT_GROUP, 60_000, 30_000);

        let alarm = engine.alarm(Level::Warn, DEFAULT_GROUP).unwrap();
        assert_eq!(alarm.last_ack_time, 1000);
        assert!(!engine.is_acked(Level::Warn, DEFAULT_GROUP, 62_000));
    }

    #[test]
    fn snooze_suppresses_without_emitting() {
        let mut engine = AlarmEngine::new();
        let mut requests = NotificationRequests::new();
        requests.request_notify(urgent_request());
        requests.request_snooze(Snooze::new(Level::Urgent, 120_000, "test"));

        assert!(engine.process(&requests, 1000).is_empty());

        // Still silenced on the next cycle without the snooze
        let mut next = NotificationRequests::new();
        next.request_notify(urgent_request());
        assert!(engine.process(&next, 60_000).is_empty());
    }

    #[test]
    fn lower_level_snooze_does_not_cover_urgent() {
        let mut engine = AlarmEngine::new();
        let mut requests = NotificationRequests::new();
        requests.request_notify(urgent_request());
        requests.request_snooze(Snooze::new(Level::Warn, 120_000, "test"));

        let events = engine.process(&requests, 1000);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::Urgent);
    }

    #[test]
    fn resolved_condition_auto_acks_with_all_clear() {
        let mut engine = AlarmEngine::new();
        let mut requests = NotificationRequests::new();
        requests.request_notify(warn_request());
        engine.process(&requests, 1000);

        // Condition cleared: no requests this cycle
        let events = engine.process(&NotificationRequests::new(), 6000);
        assert_eq!(events.len(), 1);
        assert!(events[0].clear);
        assert_eq!(events[0].title, "All Clear");

        // No outstanding emission left, so no second all clear
        assert!(engine.process(&NotificationRequests::new(), 7000).is_empty());
    }

    #[test]
    fn announcements_bypass_snoozing() {
        let mut engine = AlarmEngine::new();
        engine.ack(Level::Urgent, DEFAULT_GROUP, 600_000, 1000);

        let mut requests = NotificationRequests::new();
        let mut announcement = urgent_request();
        announcement.is_announcement = true;
        requests.request_notify(announcement);

        // Emitted despite the fresh urgent ack, every cycle
        assert_eq!(engine.process(&requests, 2000).len(), 1);
        assert_eq!(engine.process(&requests, 3000).len(), 1);
    }

    #[test]
    fn info_is_emitted_every_cycle() {
        let mut engine = AlarmEngine::new();
        let mut requests = NotificationRequests::new();
        requests.request_notify(Notify::new(Level::Info, "note", "fyi", "test"));

        assert_eq!(engine.process(&requests, 1000).len(), 1);
        assert_eq!(engine.process(&requests, 2000).len(), 1);
    }

    #[test]
    fn reset_for_tests_clears_state() {
        let mut engine = AlarmEngine::new();
        engine.ack(Level::Urgent, DEFAULT_GROUP, 600_000, 1000);
        engine.reset_for_tests();
        assert!(!engine.is_acked(Level::Urgent, DEFAULT_GROUP, 2000));
    }
}
