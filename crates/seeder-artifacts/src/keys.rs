//! Artifact key namespace shared with booting clients
//!
//! Keys are `<stage>-<arch>` for the installer stages and `agent-<arch>`
//! for the provisioning agent. Providers match keys exactly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target CPU architecture of a booting device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    #[serde(rename = "x86_64")]
    X86_64,
    Arm64,
    Arm,
}

impl Arch {
    pub const ALL: [Arch; 3] = [Arch::X86_64, Arch::Arm64, Arch::Arm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Arm64 => "arm64",
            Arch::Arm => "arm",
        }
    }

    /// Map an ONIE-reported architecture onto ours
    ///
    /// ONIE reports `armhf` for 32-bit ARM and `aarch64` on some platforms.
    pub fn from_onie(value: &str) -> Option<Self> {
        match value.trim() {
            "x86_64" | "amd64" => Some(Arch::X86_64),
            "arm64" | "aarch64" => Some(Arch::Arm64),
            "arm" | "armhf" | "armel" => Some(Arch::Arm),
            _ => None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" => Ok(Arch::X86_64),
            "arm64" => Ok(Arch::Arm64),
            "arm" => Ok(Arch::Arm),
            other => Err(format!("unknown architecture: {other}")),
        }
    }
}

/// Installer stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Stage0,
    Stage1,
    Stage2,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Stage0, Stage::Stage1, Stage::Stage2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Stage0 => "stage0",
            Stage::Stage1 => "stage1",
            Stage::Stage2 => "stage2",
        }
    }

    /// The stage a client hands off to after this one, if any
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Stage0 => Some(Stage::Stage1),
            Stage::Stage1 => Some(Stage::Stage2),
            Stage::Stage2 => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stage0" => Ok(Stage::Stage0),
            "stage1" => Ok(Stage::Stage1),
            "stage2" => Ok(Stage::Stage2),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Key of a stage installer for an architecture
pub fn stage_key(stage: Stage, arch: Arch) -> String {
    format!("{}-{}", stage.as_str(), arch.as_str())
}

/// Key of the provisioning agent binary for an architecture
pub fn agent_key(arch: Arch) -> String {
    format!("agent-{}", arch.as_str())
}

/// Every key in the namespace
pub fn all_keys() -> Vec<String> {
    let mut keys = Vec::with_capacity(Stage::ALL.len() * Arch::ALL.len() + Arch::ALL.len());
    for stage in Stage::ALL {
        for arch in Arch::ALL {
            keys.push(stage_key(stage, arch));
        }
    }
    keys.extend(Arch::ALL.into_iter().map(agent_key));
    keys
}
