use regex::Regex;
use std::fmt;

use crate::model::{Aimpoint, CollectionType};

/// Worker family a collection type is served by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerFamily {
    Stills,
    Playwright,
    Videos,
}

impl WorkerFamily {
    pub fn for_collection(collection_type: CollectionType) -> Self {
        match collection_type {
            CollectionType::Stills
            | CollectionType::FileStills
            | CollectionType::IndexStills
            | CollectionType::ImageInJson => WorkerFamily::Stills,
            CollectionType::Playwright => WorkerFamily::Playwright,
            CollectionType::M3u
            | CollectionType::First
            | CollectionType::Stream
            | CollectionType::OptionPage
            | CollectionType::Youtube
            | CollectionType::YoutubeFile
            | CollectionType::Ivideo
            | CollectionType::Ufanet
            | CollectionType::RtspMe
            | CollectionType::IpLive
            | CollectionType::HngCloud
            | CollectionType::Gndong
            | CollectionType::Baznet => WorkerFamily::Videos,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerFamily::Stills => "Stills",
            WorkerFamily::Playwright => "Playwright",
            WorkerFamily::Videos => "Videos",
        }
    }
}

/// Network path the worker needs to reach the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyFlavour {
    Direct,
    Vpn,
    Vpc,
}

impl ProxyFlavour {
    pub fn suffix(&self) -> &'static str {
        match self {
            ProxyFlavour::Direct => "",
            ProxyFlavour::Vpn => "VPN",
            ProxyFlavour::Vpc => "VPC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRoute {
    pub family: WorkerFamily,
    pub flavour: ProxyFlavour,
}

impl fmt::Display for WorkerRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.family.as_str(), self.flavour.suffix())
    }
}

/// Maps aimpoints to worker names
#[derive(Debug, Clone)]
pub struct RouteTable {
    vpc_pattern: Regex,
    worker_prefix: String,
}

impl RouteTable {
    pub fn new(vpc_pattern: &str, worker_prefix: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            vpc_pattern: Regex::new(vpc_pattern)?,
            worker_prefix: worker_prefix.into(),
        })
    }

    pub fn route(&self, aimpoint: &Aimpoint) -> WorkerRoute {
        let flavour = if aimpoint.vpn {
            ProxyFlavour::Vpn
        } else if aimpoint
            .proxy
            .as_deref()
            .is_some_and(|proxy| self.vpc_pattern.is_match(proxy))
        {
            ProxyFlavour::Vpc
        } else {
            ProxyFlavour::Direct
        };

        WorkerRoute {
            family: WorkerFamily::for_collection(aimpoint.collection_type),
            flavour,
        }
    }

    /// Invocation target, e.g. `StillsVPC`
    pub fn worker_name(&self, aimpoint: &Aimpoint) -> String {
        format!("{}{}", self.worker_prefix, self.route(aimpoint))
    }
}
