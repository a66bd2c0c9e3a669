use crate::errors::MonitorError;
use crate::logging::DEFAULT_BUDGET_BYTES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub banner: Option<String>,
    pub parallel: Option<u32>,
    pub jobs: Option<u32>,
    pub job_millis: Option<u64>,
    pub fail_job: Option<u32>,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorConfig {
    pub banner: BannerConfig,
    pub log: LogConfig,
    pub workload: WorkloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BannerConfig {
    pub title: String,
    pub help: String,
    pub pausing: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadConfig {
    pub parallel: u32,
    pub jobs: u32,
    pub job_millis: u64,
    pub fail_job: Option<u32>,
}

impl Default for BannerConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            help: "Press ESC to stop.".to_string(),
            pausing: "Pausing.".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_payload_bytes: 2048,
            budget_bytes: DEFAULT_BUDGET_BYTES,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            parallel: 10,
            jobs: 200,
            job_millis: 250,
            fail_job: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialMonitorConfig {
    banner: Option<PartialBannerConfig>,
    log: Option<PartialLogConfig>,
    workload: Option<PartialWorkloadConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialBannerConfig {
    title: Option<String>,
    help: Option<String>,
    pausing: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLogConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialWorkloadConfig {
    parallel: Option<u32>,
    jobs: Option<u32>,
    job_millis: Option<u64>,
    fail_job: Option<u32>,
}

pub fn load_config(overrides: &CliOverrides) -> Result<MonitorConfig, MonitorError> {
    let mut cfg = MonitorConfig::default();

    if let Some(path) = &overrides.config_path {
        let contents = read_config_file(path)?;
        merge_config_str(&mut cfg, &contents)?;
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn parse_config(contents: &str) -> Result<MonitorConfig, MonitorError> {
    let mut cfg = MonitorConfig::default();
    merge_config_str(&mut cfg, contents)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<String, MonitorError> {
    std::fs::read_to_string(path)
        .map_err(|e| MonitorError::Io(format!("{}: {e}", path.display())))
}

fn merge_config_str(cfg: &mut MonitorConfig, contents: &str) -> Result<(), MonitorError> {
    let partial: PartialMonitorConfig =
        toml::from_str(contents).map_err(|e| MonitorError::ConfigParse(e.to_string()))?;
    merge_partial_config(cfg, partial);
    Ok(())
}

fn merge_partial_config(cfg: &mut MonitorConfig, partial: PartialMonitorConfig) {
    if let Some(banner) = partial.banner {
        if let Some(value) = banner.title {
            cfg.banner.title = value;
        }
        if let Some(value) = banner.help {
            cfg.banner.help = value;
        }
        if let Some(value) = banner.pausing {
            cfg.banner.pausing = value;
        }
    }

    if let Some(log) = partial.log {
        if let Some(value) = log.path {
            cfg.log.path = Some(value);
        }
        if let Some(value) = log.max_payload_bytes {
            cfg.log.max_payload_bytes = value;
        }
        if let Some(value) = log.budget_bytes {
            cfg.log.budget_bytes = value;
        }
    }

    if let Some(workload) = partial.workload {
        if let Some(value) = workload.parallel {
            cfg.workload.parallel = value;
        }
        if let Some(value) = workload.jobs {
            cfg.workload.jobs = value;
        }
        if let Some(value) = workload.job_millis {
            cfg.workload.job_millis = value;
        }
        if workload.fail_job.is_some() {
            cfg.workload.fail_job = workload.fail_job;
        }
    }
}

fn apply_cli_overrides(cfg: &mut MonitorConfig, overrides: &CliOverrides) {
    if let Some(banner) = &overrides.banner {
        cfg.banner.title = banner.clone();
    }
    if let Some(parallel) = overrides.parallel {
        cfg.workload.parallel = parallel;
    }
    if let Some(jobs) = overrides.jobs {
        cfg.workload.jobs = jobs;
    }
    if let Some(job_millis) = overrides.job_millis {
        cfg.workload.job_millis = job_millis;
    }
    if overrides.fail_job.is_some() {
        cfg.workload.fail_job = overrides.fail_job;
    }
    if let Some(path) = &overrides.log_path {
        cfg.log.path = Some(path.clone());
    }
}

fn validate_config(cfg: &MonitorConfig) -> Result<(), MonitorError> {
    if cfg.banner.help.trim().is_empty() {
        return Err(MonitorError::InvalidConfig(
            "banner.help must tell the user how to stop the run".to_string(),
        ));
    }
    if cfg.workload.parallel == 0 {
        return Err(MonitorError::InvalidConfig(
            "workload.parallel must be greater than zero".to_string(),
        ));
    }
    if cfg.log.budget_bytes <= cfg.log.max_payload_bytes as u64 {
        return Err(MonitorError::InvalidConfig(
            "log.budget_bytes must exceed log.max_payload_bytes".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load_config, parse_config, CliOverrides, MonitorConfig};
    use crate::errors::MonitorError;

    #[test]
    fn defaults_validate() {
        let cfg = load_config(&CliOverrides::default()).expect("defaults");
        assert_eq!(cfg, MonitorConfig::default());
        assert_eq!(cfg.banner.help, "Press ESC to stop.");
        assert_eq!(cfg.workload.parallel, 10);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let cfg = parse_config(
            r#"
[banner]
title = "Canonicalizing URLs"

[workload]
parallel = 4
"#,
        )
        .expect("parse");
        assert_eq!(cfg.banner.title, "Canonicalizing URLs");
        assert_eq!(cfg.banner.pausing, "Pausing.");
        assert_eq!(cfg.workload.parallel, 4);
        assert_eq!(cfg.workload.jobs, 200);
    }

    #[test]
    fn cli_overrides_win_over_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("jobmon.toml");
        std::fs::write(&path, "[workload]\nparallel = 4\njobs = 9\n").expect("write");
        let cfg = load_config(&CliOverrides {
            config_path: Some(path),
            parallel: Some(2),
            banner: Some("Batch".to_string()),
            ..CliOverrides::default()
        })
        .expect("load");
        assert_eq!(cfg.workload.parallel, 2);
        assert_eq!(cfg.workload.jobs, 9);
        assert_eq!(cfg.banner.title, "Batch");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = parse_config("[workload]\nparallel = 0\n").expect_err("zero parallel");
        assert!(matches!(err, MonitorError::InvalidConfig(_)));

        let err = parse_config("[banner]\nhelp = \"  \"\n").expect_err("blank help");
        assert!(matches!(err, MonitorError::InvalidConfig(_)));

        let err = parse_config("[workload]\nthreads = 3\n").expect_err("unknown key");
        assert!(matches!(err, MonitorError::ConfigParse(_)));
    }
}
