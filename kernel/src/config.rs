//! Boot-time configuration, read from the kernel command line as
//! whitespace-separated `key=value` pairs, e.g.
//! `replacement=lapa sched=cfs quota=8 exempt=1,2`.

use crate::swapping::ReplacementPolicy;
use crate::threading::process::Pid;
use crate::threading::scheduling::SchedulingPolicy;
use alloc::{string::String, string::ToString, vec, vec::Vec};
use core::fmt;
use log::LevelFilter;
use nom::{
    bytes::complete::take_while1,
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{all_consuming, map_res},
    multi::{separated_list0, separated_list1},
    sequence::{delimited, separated_pair},
    Finish, IResult,
};

/// Upper bound on the per-process resident quota.
pub const MAX_QUOTA: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootConfig {
    pub replacement: ReplacementPolicy,
    pub scheduling: SchedulingPolicy,
    /// Maximum resident pages of a paged process.
    pub quota: usize,
    pub max_processes: usize,
    pub threads_per_process: usize,
    /// Processes that are never paged, however large they grow.
    pub exempt: Vec<Pid>,
    pub log_level: LevelFilter,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            replacement: ReplacementPolicy::Scfifo,
            scheduling: SchedulingPolicy::RoundRobin,
            quota: 16,
            max_processes: 64,
            threads_per_process: 4,
            // init and the shell
            exempt: vec![1, 2],
            log_level: LevelFilter::Info,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The command line is not a list of `key=value` pairs.
    Syntax,
    UnknownKey(String),
    InvalidValue { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Syntax => write!(f, "expected key=value pairs"),
            ConfigError::UnknownKey(key) => write!(f, "unknown option {key:?}"),
            ConfigError::InvalidValue { key, value } => write!(f, "bad value {value:?} for {key}"),
        }
    }
}

impl core::error::Error for ConfigError {}

fn pair(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        char('='),
        take_while1(|c: char| !c.is_whitespace()),
    )(input)
}

fn pairs(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
    all_consuming(delimited(
        multispace0,
        separated_list0(multispace1, pair),
        multispace0,
    ))(input)
}

fn pid_list(input: &str) -> IResult<&str, Vec<Pid>> {
    all_consuming(separated_list1(
        char(','),
        map_res(digit1, |digits: &str| digits.parse::<Pid>()),
    ))(input)
}

impl BootConfig {
    pub fn parse(command_line: &str) -> Result<Self, ConfigError> {
        let (_, pairs) = pairs(command_line)
            .finish()
            .map_err(|_| ConfigError::Syntax)?;

        let mut config = Self::default();
        for (key, value) in pairs {
            let invalid = || ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            };
            match key {
                "replacement" => {
                    config.replacement = match value {
                        "nfua" => ReplacementPolicy::Nfua,
                        "lapa" => ReplacementPolicy::Lapa,
                        "scfifo" => ReplacementPolicy::Scfifo,
                        "none" => ReplacementPolicy::None,
                        _ => return Err(invalid()),
                    }
                }
                "sched" => {
                    config.scheduling = match value {
                        "rr" => SchedulingPolicy::RoundRobin,
                        "priority" => SchedulingPolicy::Priority,
                        "cfs" => SchedulingPolicy::Cfs,
                        _ => return Err(invalid()),
                    }
                }
                "quota" => {
                    config.quota = value
                        .parse::<usize>()
                        .ok()
                        .filter(|quota| (1..=MAX_QUOTA).contains(quota))
                        .ok_or_else(invalid)?;
                }
                "nproc" => {
                    config.max_processes = value
                        .parse::<usize>()
                        .ok()
                        .filter(|&n| n > 0)
                        .ok_or_else(invalid)?;
                }
                "nkt" => {
                    config.threads_per_process = value
                        .parse::<usize>()
                        .ok()
                        .filter(|&n| n > 0)
                        .ok_or_else(invalid)?;
                }
                "exempt" => {
                    config.exempt = pid_list(value).finish().map_err(|_| invalid())?.1;
                }
                "log" => config.log_level = value.parse().map_err(|_| invalid())?,
                _ => return Err(ConfigError::UnknownKey(key.to_string())),
            }
        }
        Ok(config)
    }

    /// Whether a process with `pid` is subject to demand paging.
    pub fn is_paged(&self, pid: Pid) -> bool {
        self.replacement.is_enabled() && !self.exempt.contains(&pid)
    }
}
