//! Plugin pipeline
//!
//! ## Overview
//!
//! The pipeline holds an ordered list of computation plugins and drives
//! one evaluation cycle: every enabled plugin's `set_properties` runs in
//! registration order, then every enabled plugin's `check_notifications`,
//! then the alarm engine reduces the collected requests into events.
//!
//! ```text
//! RecordStore ──▶ Sandbox ──▶ set_properties (each plugin, in order)
//!                     │
//!                     ├──▶ check_notifications (each plugin, in order)
//!                     │
//!                     └──▶ AlarmEngine::process ──▶ events
//! ```
//!
//! ## Failure isolation
//!
//! A plugin failure is caught, logged with the plugin name, and the cycle
//! continues; the failed plugin's property is simply absent. One broken
//! plugin must never take the dashboard down with it.

use log::warn;

use crate::alarms::{AlarmEngine, AlarmEvent};
use crate::errors::PluginResult;
use crate::profile::ProfileResolver;
use crate::records::RecordStore;
use crate::sandbox::{Properties, Sandbox};
use crate::settings::Settings;
use crate::time::Timestamp;

/// A computation unit in the pipeline
///
/// Both hooks default to no-ops; a plugin overrides the capabilities it
/// has. Hooks return `Err` to report a failed computation - the pipeline
/// logs it and moves on.
pub trait Plugin {
    /// Stable name; doubles as the property name and the settings key.
    fn name(&self) -> &'static str;

    /// Compute and offer derived properties.
    fn set_properties(&self, _sbx: &mut Sandbox) -> PluginResult<()> {
        Ok(())
    }

    /// Evaluate alarm conditions and file notification requests.
    fn check_notifications(&self, _sbx: &mut Sandbox) -> PluginResult<()> {
        Ok(())
    }
}

/// Ordered plugin list driving one cycle at a time
#[derive(Default)]
pub struct Pipeline {
    plugins: Vec<Box<dyn Plugin>>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin. Registration order is priority order for the
    /// write-once property bag.
    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> &mut Self {
        self.plugins.push(plugin);
        self
    }

    /// Names of all registered plugins, in order.
    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Run one full evaluation cycle at `time`.
    ///
    /// Returns the published properties and the alarm events the cycle
    /// emitted. The sandbox is built fresh and dropped here; nothing
    /// carries over to the next cycle except alarm state.
    pub fn run_cycle(
        &self,
        time: Timestamp,
        store: &RecordStore,
        profile: &ProfileResolver,
        settings: &Settings,
        alarms: &mut AlarmEngine,
    ) -> (Properties, Vec<AlarmEvent>) {
        let mut sbx = Sandbox::new(time, store, profile, settings);

        for plugin in self.enabled(settings) {
            if let Err(e) = plugin.set_properties(&mut sbx) {
                warn!("plugin `{}` set_properties failed: {}", plugin.name(), e);
            }
        }

        for plugin in self.enabled(settings) {
            if let Err(e) = plugin.check_notifications(&mut sbx) {
                warn!(
                    "plugin `{}` check_notifications failed: {}",
                    plugin.name(),
                    e
                );
            }
        }

        let events = alarms.process(&sbx.requests, time);
        (sbx.properties, events)
    }

    fn enabled<'a>(
        &'a self,
        settings: &'a Settings,
    ) -> impl Iterator<Item = &'a dyn Plugin> + 'a {
        self.plugins
            .iter()
            .map(|p| p.as_ref())
            .filter(|p| settings.is_enabled(p.name()))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("plugins", &self.plugin_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PluginError;
    use crate::sandbox::PropertyValue;

    struct Publisher {
        name: &'static str,
        value: i64,
    }

    impl Plugin for Publisher {
        fn name(&self) -> &'static str {
            self.name
        }
        fn set_properties(&self, sbx: &mut Sandbox) -> PluginResult<()> {
            let value = self.value;
            sbx.offer_property("shared", move || {
                Some(PropertyValue::Custom(serde_json::json!(value)))
            });
            Ok(())
        }
    }

    struct Failing;

    impl Plugin for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn set_properties(&self, _sbx: &mut Sandbox) -> PluginResult<()> {
            Err(PluginError::Other("boom"))
        }
    }

    fn harness() -> (RecordStore, ProfileResolver, AlarmEngine) {
        (RecordStore::new(), ProfileResolver::new(), AlarmEngine::new())
    }

    fn settings_enabling(names: &[&str]) -> Settings {
        Settings {
            enabled_plugins: names.iter().map(|s| s.to_string()).collect(),
            ..Settings::default()
        }
    }

    #[test]
    fn registration_order_is_priority_order() {
        let (store, profile, mut alarms) = harness();
        let settings = settings_enabling(&["first", "second"]);

        let mut pipeline = Pipeline::new();
        pipeline.register(Box::new(Publisher { name: "first", value: 1 }));
        pipeline.register(Box::new(Publisher { name: "second", value: 2 }));

        let (properties, _) = pipeline.run_cycle(1000, &store, &profile, &settings, &mut alarms);
        match properties.get("shared") {
            Some(PropertyValue::Custom(v)) => assert_eq!(*v, serde_json::json!(1)),
            other => panic!("unexpected property {:?}", other),
        }
    }

    #[test]
    fn one_failing_plugin_does_not_stop_the_rest() {
        let (store, profile, mut alarms) = harness();
        let settings = settings_enabling(&["failing", "after"]);

        let mut pipeline = Pipeline::new();
        pipeline.register(Box::new(Failing));
        pipeline.register(Box::new(Publisher { name: "after", value: 7 }));

        let (properties, _) = pipeline.run_cycle(1000, &store, &profile, &settings, &mut alarms);
        assert!(properties.contains("shared"));
    }

    #[test]
    fn disabled_plugins_are_skipped() {
        let (store, profile, mut alarms) = harness();
        let settings = settings_enabling(&["second"]);

        let mut pipeline = Pipeline::new();
        pipeline.register(Box::new(Publisher { name: "first", value: 1 }));
        pipeline.register(Box::new(Publisher { name: "second", value: 2 }));

        let (properties, _) = pipeline.run_cycle(1000, &store, &profile, &settings, &mut alarms);
        match properties.get("shared") {
            Some(PropertyValue::Custom(v)) => assert_eq!(*v, serde_json::json!(2)),
            other => panic!("unexpected property {:?}", other),
        }
    }
}
