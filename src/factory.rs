//! Job factories (C8): turn a stored [`JobDetail`] into the concrete
//! [`Job`] a trigger fires, optionally binding data-map values onto it
//! first.

use crate::job::{Job, JobDataMap, JobDetail};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Produces a runnable [`Job`] for a fired trigger.
pub trait JobFactory: Send + Sync {
    /// Returns the job to execute. The default implementation used by
    /// [`SimpleJobFactory`] just returns the job already attached to the
    /// detail; [`PropertySettingJobFactory`] additionally binds data.
    fn new_job(&self, detail: &JobDetail, merged_data: &JobDataMap) -> Arc<dyn Job>;
}

/// Returns the [`Job`] already stored on the [`JobDetail`] unchanged.
///
/// This is the default factory: most jobs carry their own configuration as
/// fields set at construction time, so no further binding step is needed.
#[derive(Debug, Default)]
pub struct SimpleJobFactory;

impl JobFactory for SimpleJobFactory {
    fn new_job(&self, detail: &JobDetail, _merged_data: &JobDataMap) -> Arc<dyn Job> {
        Arc::clone(detail.job())
    }
}

/// A job whose fields can be set from a [`JobDataMap`] by name.
///
/// Implementors expose typed setters through [`PropertySettable::set_property`];
/// [`PropertySettingJobFactory`] calls it once per data-map entry, performing
/// the primitive coercions the property-setting strategy requires.
pub trait PropertySettable {
    /// Attempts to set `name` to `value`. Returns `Err` with a message if
    /// the property is unknown or the value couldn't be coerced.
    fn set_property(&mut self, name: &str, value: &Value) -> Result<(), String>;
}

/// A registry of named job constructors, consulted by
/// [`PropertySettingJobFactory`] when a job type needs fresh construction
/// before its properties are bound (as opposed to reusing the instance
/// already on the [`JobDetail`]).
#[derive(Default)]
pub struct JobTypeRegistry {
    constructors: RwLock<HashMap<String, Arc<dyn Fn() -> Box<dyn PropertySettableJob> + Send + Sync>>>,
}

/// A job that is both runnable and property-settable, the shape
/// [`JobTypeRegistry`] constructs.
pub trait PropertySettableJob: Job + PropertySettable {
    /// Drops the property-settable view once binding is done, yielding the
    /// plain [`Job`] the factory hands back to the scheduler.
    fn into_job(self: Box<Self>) -> Box<dyn Job>;
}

impl<T: Job + PropertySettable + 'static> PropertySettableJob for T {
    fn into_job(self: Box<Self>) -> Box<dyn Job> {
        self
    }
}

impl JobTypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor for `type_id`.
    pub fn register<F>(&self, type_id: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn PropertySettableJob> + Send + Sync + 'static,
    {
        self.constructors
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(type_id.into(), Arc::new(constructor));
    }

    fn construct(&self, type_id: &str) -> Option<Box<dyn PropertySettableJob>> {
        self.constructors
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(type_id)
            .map(|ctor| ctor())
    }
}

/// Whether [`PropertySettingJobFactory`] treats a data-map key with no
/// matching property as an error or a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedPropertyPolicy {
    /// Log a warning and continue.
    WarnIfNotFound,
    /// Fail the whole binding.
    ThrowIfNotFound,
}

/// Binds merged job-data-map values onto a freshly constructed job by name,
/// coercing JSON values to the primitive types Rust setters expect:
/// numeric strings parse as the target type, `"true"`/`"false"`
/// (case-insensitive) parse as booleans, and single-character strings parse
/// as chars. A `null` value bound to any of these is an error.
pub struct PropertySettingJobFactory {
    registry: JobTypeRegistry,
    unmatched_policy: UnmatchedPropertyPolicy,
}

impl PropertySettingJobFactory {
    /// Builds a factory over `registry`, warning (not failing) on data-map
    /// keys that don't correspond to a settable property.
    pub fn new(registry: JobTypeRegistry) -> Self {
        Self {
            registry,
            unmatched_policy: UnmatchedPropertyPolicy::WarnIfNotFound,
        }
    }

    /// Sets the unmatched-property policy.
    pub fn with_unmatched_policy(mut self, policy: UnmatchedPropertyPolicy) -> Self {
        self.unmatched_policy = policy;
        self
    }

    fn type_id_of(detail: &JobDetail) -> Option<String> {
        detail
            .job_data_map()
            .get_string("__type_id")
            .map(str::to_string)
    }
}

impl JobFactory for PropertySettingJobFactory {
    fn new_job(&self, detail: &JobDetail, merged_data: &JobDataMap) -> Arc<dyn Job> {
        let Some(type_id) = Self::type_id_of(detail) else {
            return Arc::clone(detail.job());
        };
        let Some(mut job) = self.registry.construct(&type_id) else {
            warn!(type_id, "no registered constructor; falling back to stored job instance");
            return Arc::clone(detail.job());
        };

        for (key, value) in merged_data.iter() {
            if key == "__type_id" {
                continue;
            }
            match job.set_property(key, value) {
                Ok(()) => {}
                Err(message) => match self.unmatched_policy {
                    UnmatchedPropertyPolicy::WarnIfNotFound => {
                        warn!(property = key, error = message, "skipping unbindable property");
                    }
                    UnmatchedPropertyPolicy::ThrowIfNotFound => {
                        warn!(property = key, error = message, "failed binding property; using stored job instance");
                        return Arc::clone(detail.job());
                    }
                },
            }
        }
        Arc::from(job.into_job())
    }
}

/// Coerces a JSON value into a `bool`, per the "true"/"false"
/// case-insensitive string rule.
pub fn coerce_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(format!("'{other}' is not a boolean")),
        },
        Value::Null => Err("cannot coerce null to bool".to_string()),
        other => Err(format!("cannot coerce {other} to bool")),
    }
}

/// Coerces a JSON value into an `i64`, accepting both numbers and
/// decimal-formatted strings.
pub fn coerce_i64(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| format!("{n} does not fit in i64")),
        Value::String(s) => s.parse::<i64>().map_err(|e| e.to_string()),
        Value::Null => Err("cannot coerce null to i64".to_string()),
        other => Err(format!("cannot coerce {other} to i64")),
    }
}

/// Coerces a JSON value into an `f64`, accepting both numbers and
/// decimal-formatted strings.
pub fn coerce_f64(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("{n} does not fit in f64")),
        Value::String(s) => s.parse::<f64>().map_err(|e| e.to_string()),
        Value::Null => Err("cannot coerce null to f64".to_string()),
        other => Err(format!("cannot coerce {other} to f64")),
    }
}

/// Coerces a JSON value into a single `char`, requiring exactly one
/// character for string inputs.
pub fn coerce_char(value: &Value) -> Result<char, String> {
    match value {
        Value::String(s) if s.chars().count() == 1 => Ok(s.chars().next().expect("checked len")),
        Value::String(s) => Err(format!("'{s}' is not a single character")),
        Value::Null => Err("cannot coerce null to char".to_string()),
        other => Err(format!("cannot coerce {other} to char")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerResult;
    use crate::job::ExecutionContext;
    use crate::keys::JobKey;

    struct Greeter {
        greeting: String,
        volume: i64,
    }

    impl Job for Greeter {
        fn execute(&self, ctx: &mut ExecutionContext) -> SchedulerResult<()> {
            ctx.set_result(Value::String(format!("{} x{}", self.greeting, self.volume)));
            Ok(())
        }
    }

    impl PropertySettable for Greeter {
        fn set_property(&mut self, name: &str, value: &Value) -> Result<(), String> {
            match name {
                "greeting" => {
                    self.greeting = value.as_str().ok_or("greeting must be a string")?.to_string();
                    Ok(())
                }
                "volume" => {
                    self.volume = coerce_i64(value)?;
                    Ok(())
                }
                other => Err(format!("unknown property '{other}'")),
            }
        }
    }

    fn detail_with_type(type_id: &str) -> JobDetail {
        JobDetail::new(
            JobKey::new("j1"),
            Arc::new(Greeter {
                greeting: "hi".into(),
                volume: 0,
            }),
        )
        .with_data(JobDataMap::new().with("__type_id", type_id))
    }

    #[test]
    fn simple_factory_returns_stored_instance() {
        let detail = detail_with_type("greeter");
        let factory = SimpleJobFactory;
        let job = factory.new_job(&detail, &JobDataMap::new());
        assert!(Arc::ptr_eq(&job, detail.job()));
    }

    #[test]
    fn property_setting_factory_binds_registered_constructor() {
        let registry = JobTypeRegistry::new();
        registry.register("greeter", || {
            Box::new(Greeter {
                greeting: String::new(),
                volume: 0,
            })
        });
        let factory = PropertySettingJobFactory::new(registry);
        let detail = detail_with_type("greeter");
        let data = JobDataMap::new().with("greeting", "hello").with("volume", 3);
        let job = factory.new_job(&detail, &data);
        let mut ctx = ExecutionContext::new(
            JobKey::new("j1"),
            crate::keys::TriggerKey::new("t1"),
            JobDataMap::new(),
            chrono::Utc::now(),
            None,
            None,
            None,
            0,
            false,
        );
        job.execute(&mut ctx).unwrap();
        assert_eq!(ctx.result(), Some(&Value::String("hello x3".into())));
    }

    #[test]
    fn unknown_type_id_falls_back_to_stored_instance() {
        let registry = JobTypeRegistry::new();
        let factory = PropertySettingJobFactory::new(registry);
        let detail = detail_with_type("missing");
        let job = factory.new_job(&detail, &JobDataMap::new());
        assert!(Arc::ptr_eq(&job, detail.job()));
    }

    #[test]
    fn coerce_bool_accepts_case_insensitive_strings() {
        assert_eq!(coerce_bool(&Value::String("TRUE".into())), Ok(true));
        assert_eq!(coerce_bool(&Value::String("False".into())), Ok(false));
        assert!(coerce_bool(&Value::Null).is_err());
    }

    #[test]
    fn coerce_char_requires_single_character() {
        assert_eq!(coerce_char(&Value::String("x".into())), Ok('x'));
        assert!(coerce_char(&Value::String("xy".into())).is_err());
    }
}
