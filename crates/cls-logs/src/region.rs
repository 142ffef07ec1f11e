// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Known CLS regions and endpoint host derivation.

use std::fmt;
use std::str::FromStr;

const INTERNAL_DOMAIN: &str = "cls.tencentyun.com";
const EXTERNAL_DOMAIN: &str = "cls.tencentcs.com";

/// Returns the ingestion host for `region`.
///
/// Workloads running inside Tencent Cloud reach CLS through the internal domain; everything else
/// goes through the public one.
#[must_use]
pub fn endpoint_host(region: &str, internal: bool) -> String {
    let domain = if internal {
        INTERNAL_DOMAIN
    } else {
        EXTERNAL_DOMAIN
    };
    format!("{region}.{domain}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Beijing,
    Guangzhou,
    Shanghai,
    Nanjing,
    Chengdu,
    Chongqing,
    HongKong,
    SiliconValley,
    Ashburn,
    Singapore,
    Mumbai,
    Frankfurt,
    Tokyo,
    Seoul,
    Moscow,
    ShenzhenFsi,
    ShanghaiFsi,
    BeijingFsi,
}

impl Region {
    pub const ALL: [Region; 18] = [
        Region::Beijing,
        Region::Guangzhou,
        Region::Shanghai,
        Region::Nanjing,
        Region::Chengdu,
        Region::Chongqing,
        Region::HongKong,
        Region::SiliconValley,
        Region::Ashburn,
        Region::Singapore,
        Region::Mumbai,
        Region::Frankfurt,
        Region::Tokyo,
        Region::Seoul,
        Region::Moscow,
        Region::ShenzhenFsi,
        Region::ShanghaiFsi,
        Region::BeijingFsi,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Region::Beijing => "ap-beijing",
            Region::Guangzhou => "ap-guangzhou",
            Region::Shanghai => "ap-shanghai",
            Region::Nanjing => "ap-nanjing",
            Region::Chengdu => "ap-chengdu",
            Region::Chongqing => "ap-chongqing",
            Region::HongKong => "ap-hongkong",
            Region::SiliconValley => "na-siliconvalley",
            Region::Ashburn => "na-ashburn",
            Region::Singapore => "ap-singapore",
            Region::Mumbai => "ap-mumbai",
            Region::Frankfurt => "eu-frankfurt",
            Region::Tokyo => "ap-tokyo",
            Region::Seoul => "ap-seoul",
            Region::Moscow => "eu-moscow",
            Region::ShenzhenFsi => "ap-shenzhen-fsi",
            Region::ShanghaiFsi => "ap-shanghai-fsi",
            Region::BeijingFsi => "ap-beijing-fsi",
        }
    }

    #[must_use]
    pub fn host(self, internal: bool) -> String {
        endpoint_host(self.as_str(), internal)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown region: {0}")]
pub struct UnknownRegion(pub String);

impl FromStr for Region {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Region::ALL
            .into_iter()
            .find(|region| region.as_str() == wanted)
            .ok_or_else(|| UnknownRegion(s.to_string()))
    }
}
