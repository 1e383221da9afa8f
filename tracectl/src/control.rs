// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tracing runtime control.

use ordermap::OrderMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::OnceLock;
#[allow(unused)]
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, Registry, filter::LevelFilter, prelude::*, reload};

use crate::{targets::TRACING_TARGETS, trace_target};

trace_target!("tracectl", LevelFilter::INFO, &["hipmr"]);

/// Errors configuring tracing
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TraceCtlError {
    #[error("invalid level '{0}'")]
    InvalidLevel(String),
    #[error("invalid item '{0}': expected tag=level")]
    InvalidSyntax(String),
    #[error("unknown tag '{0}'")]
    UnknownTag(String),
}

/// Configuration of one target
#[derive(Debug, Clone)]
pub struct TargetCfg {
    pub target: &'static str,
    pub name: &'static str,
    pub level: LevelFilter,
    pub tags: Vec<&'static str>,
}

impl TargetCfg {
    fn new(
        target: &'static str,
        name: &'static str,
        level: LevelFilter,
        tags: &'static [&'static str],
    ) -> Self {
        // a target is always reachable by its own name
        let mut tags = tags.to_vec();
        if !tags.contains(&name) {
            tags.push(name);
        }
        Self {
            target,
            name,
            level,
            tags,
        }
    }
}

#[derive(Debug)]
struct TargetDb {
    level: LevelFilter,
    targets: OrderMap<&'static str, TargetCfg>,
    tags: OrderMap<&'static str, HashSet<&'static str>>,
}

impl TargetDb {
    fn load(level: LevelFilter) -> Self {
        let mut db = Self {
            level,
            targets: OrderMap::new(),
            tags: OrderMap::new(),
        };
        for decl in TRACING_TARGETS {
            db.register(TargetCfg::new(decl.target, decl.name, decl.level, decl.tags));
        }
        db
    }

    fn register(&mut self, cfg: TargetCfg) {
        let target = cfg.target;
        for tag in &cfg.tags {
            self.tags.entry(*tag).or_default().insert(target);
        }
        if self.targets.insert(target, cfg).is_some() {
            warn!("Target {target} has been declared more than once");
        }
    }

    fn env_filter(&self) -> EnvFilter {
        self.targets
            .values()
            .filter_map(|t| format!("{}={}", t.target, t.level).parse().ok())
            .fold(EnvFilter::new(self.level.to_string()), EnvFilter::add_directive)
    }

    /// Set the level of all targets with the given tag. Returns how many changed.
    fn set_tag_level(&mut self, tag: &str, level: LevelFilter) -> Result<usize, TraceCtlError> {
        let members = self
            .tags
            .get(tag)
            .ok_or_else(|| TraceCtlError::UnknownTag(tag.to_string()))?;
        let mut changed = 0;
        for target in self.targets.values_mut() {
            if members.contains(target.target) && target.level != level {
                target.level = level;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn as_config_string(&self) -> String {
        let mut out = format!("default={}", self.level);
        for target in self.targets.values() {
            out += &format!(",{}={}", target.name, target.level);
        }
        out
    }
}

impl Display for TargetDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{:>40} │ {:>8} │ TAGS", "TARGET", "LEVEL")?;
        for t in self.targets.values() {
            writeln!(f, "{:>40} │ {:>8} │ {}", t.target, t.level, t.tags.join(","))?;
        }
        write!(f, "{:>40} │ {:>8} │ --", "(default)", self.level)
    }
}

/// Display of the targets grouped by tag
struct ByTag<'a>(&'a TargetDb);

impl Display for ByTag<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        for (tag, members) in &self.0.tags {
            writeln!(f, " {tag}:")?;
            for t in self.0.targets.values().filter(|t| members.contains(t.target)) {
                writeln!(f, "      {:<40} : {}", t.target, t.level)?;
            }
        }
        Ok(())
    }
}

/// Runtime control of the levels of the registered tracing targets
#[derive(Debug)]
pub struct TracingControl {
    db: Mutex<TargetDb>,
    reload_filter: reload::Handle<EnvFilter, Registry>,
}

static TRACING_CTL: OnceLock<TracingControl> = OnceLock::new();

/// Get the process-wide [`TracingControl`], installing the subscriber on first use
pub fn get_trace_ctl() -> &'static TracingControl {
    TRACING_CTL.get_or_init(TracingControl::new)
}

impl TracingControl {
    fn new() -> Self {
        let db = TargetDb::load(LevelFilter::INFO);
        let (filter, reload_filter) = reload::Layer::new(db.env_filter());
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_line_number(true)
            .with_target(true)
            .with_thread_names(true)
            .with_level(true);

        // another subscriber may already be installed (e.g. by a test harness)
        if let Err(e) = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
        {
            warn!("Tracing subscriber not installed: {e}");
        }
        Self {
            db: Mutex::new(db),
            reload_filter,
        }
    }

    fn reload(&self, db: &TargetDb) {
        if let Err(e) = self.reload_filter.reload(db.env_filter()) {
            error!("Failed to reload tracing filter: {e}");
        }
    }

    /// Install the subscriber if not done yet
    pub fn init() {
        get_trace_ctl();
    }

    /// Set the level of all targets carrying `tag`
    ///
    /// # Errors
    ///
    /// Fails if no target carries the tag.
    pub fn set_tag_level(&self, tag: &str, level: LevelFilter) -> Result<(), TraceCtlError> {
        let mut db = self.db.lock();
        let changed = db.set_tag_level(tag, level)?;
        if changed > 0 {
            self.reload(&db);
        }
        debug!("Log level for tag '{tag}' set to {level}: {changed} targets changed");
        Ok(())
    }

    /// Set the level of every target
    pub fn set_level_all(&self, level: LevelFilter) {
        let mut db = self.db.lock();
        db.targets.values_mut().for_each(|t| t.level = level);
        self.reload(&db);
    }

    /// Set the level of events not covered by any target
    pub fn set_default_level(&self, level: LevelFilter) {
        let mut db = self.db.lock();
        if db.level != level {
            db.level = level;
            self.reload(&db);
        }
    }

    #[must_use]
    pub fn get_default_level(&self) -> LevelFilter {
        self.db.lock().level
    }

    #[must_use]
    pub fn get_target(&self, target: &str) -> Option<TargetCfg> {
        self.db.lock().targets.get(target).cloned()
    }

    #[must_use]
    pub fn get_targets_by_tag(&self, tag: &str) -> Vec<TargetCfg> {
        let db = self.db.lock();
        let Some(members) = db.tags.get(tag) else {
            return vec![];
        };
        db.targets
            .values()
            .filter(|t| members.contains(t.target))
            .cloned()
            .collect()
    }

    fn parse_config(input: &str) -> Result<Vec<(String, LevelFilter)>, TraceCtlError> {
        input
            .split(',')
            .map(str::trim)
            .map(|item| {
                let (tag, level) = item
                    .split_once('=')
                    .ok_or_else(|| TraceCtlError::InvalidSyntax(item.to_string()))?;
                let level = LevelFilter::from_str(level.trim())
                    .map_err(|_| TraceCtlError::InvalidLevel(level.trim().to_string()))?;
                Ok((tag.trim().to_string(), level))
            })
            .collect()
    }

    /// Configure levels from comma-separated `tag=level` items. `default=level` sets the
    /// default level and `all=level` sets every target; other items apply to their tag,
    /// in order, so they can refine `all`.
    ///
    /// # Errors
    ///
    /// Fails on syntax errors, bad levels and unknown tags. Nothing is applied if the
    /// input does not parse.
    pub fn setup_from_string(&self, input: &str) -> Result<(), TraceCtlError> {
        let config = Self::parse_config(input)?;
        for (tag, level) in config {
            match tag.as_str() {
                "default" => self.set_default_level(level),
                "all" => self.set_level_all(level),
                tag => self.set_tag_level(tag, level)?,
            }
        }
        Ok(())
    }

    /// Log the configuration of every target
    pub fn dump(&self) {
        let db = self.db.lock();
        info!("{db}");
    }

    /// Log the targets grouped by tag
    pub fn dump_targets_by_tag(&self) {
        let db = self.db.lock();
        info!("{}", ByTag(&db));
    }

    #[must_use]
    pub fn as_config_string(&self) -> String {
        self.db.lock().as_config_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custom_target;
    use serial_test::serial;

    const TAG: &str = "test-common";
    custom_target!("test-t1", LevelFilter::DEBUG, &[TAG]);
    custom_target!("test-t2", LevelFilter::ERROR, &[TAG]);

    #[test]
    #[serial]
    fn test_link_time_registration() {
        let tctl = get_trace_ctl();
        /* this module and the custom targets were collected at link time */
        assert!(tctl.get_target("hipmr_tracectl::control").is_some());
        assert_eq!(
            tctl.get_target("test-t1").map(|t| t.tags),
            Some(vec![TAG, "test-t1"])
        );
        assert_eq!(tctl.get_targets_by_tag(TAG).len(), 2);
    }

    #[test]
    #[serial]
    fn test_setup_from_string() {
        let tctl = get_trace_ctl();
        tctl.setup_from_string("default=warn, all=info, test-common=off, test-t2=trace")
            .expect("Should succeed");
        assert_eq!(tctl.get_default_level(), LevelFilter::WARN);
        assert_eq!(tctl.get_target("test-t1").map(|t| t.level), Some(LevelFilter::OFF));
        assert_eq!(tctl.get_target("test-t2").map(|t| t.level), Some(LevelFilter::TRACE));
        assert!(tctl.as_config_string().starts_with("default=warn"));
    }

    #[test]
    #[serial]
    fn test_setup_from_string_errors() {
        let tctl = get_trace_ctl();
        assert_eq!(
            tctl.setup_from_string("test-t1=loud"),
            Err(TraceCtlError::InvalidLevel("loud".to_string()))
        );
        assert_eq!(
            tctl.setup_from_string("test-t1=info, oops"),
            Err(TraceCtlError::InvalidSyntax("oops".to_string()))
        );
        assert_eq!(
            tctl.setup_from_string("no-such-tag=info"),
            Err(TraceCtlError::UnknownTag("no-such-tag".to_string()))
        );
    }
}
