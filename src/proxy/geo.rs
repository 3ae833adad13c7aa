//! Geolocation of exit IPs

use crate::Result;
use anyhow::{anyhow, Context};
use maxminddb::{geoip2, Reader};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// Country, city and provider for an IP; empty strings when unknown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GeoInfo {
    pub country: String,
    pub city: String,
    pub isp: String,
}

/// Maps an IP address string to [`GeoInfo`].
///
/// Implementations must fail (not panic) on empty or unparseable input.
pub trait GeoResolver: Send + Sync {
    fn lookup(&self, ip: &str) -> Result<GeoInfo>;
}

fn parse_ip(ip: &str) -> Result<IpAddr> {
    let ip = ip.trim();
    if ip.is_empty() {
        return Err(anyhow!("empty ip address"));
    }
    ip.parse()
        .with_context(|| format!("invalid ip address {:?}", ip))
}

/// Resolver used when no database is configured: accepts any valid address and
/// returns no enrichment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeoResolver;

impl GeoResolver for NoGeoResolver {
    fn lookup(&self, ip: &str) -> Result<GeoInfo> {
        parse_ip(ip)?;
        Ok(GeoInfo::default())
    }
}

/// MaxMind MMDB backed resolver: a City database for location and an optional
/// ASN database for the provider name.
#[derive(Clone)]
pub struct MmdbResolver {
    city: Arc<Reader<Vec<u8>>>,
    asn: Option<Arc<Reader<Vec<u8>>>>,
}

impl MmdbResolver {
    /// Open a City database
    pub fn from_path<P: AsRef<Path>>(city_db: P) -> Result<Self> {
        let path = city_db.as_ref();
        let reader = Reader::open_readfile(path)
            .with_context(|| format!("failed to open city database {}", path.display()))?;
        Ok(Self {
            city: Arc::new(reader),
            asn: None,
        })
    }

    /// Attach an ASN database used to fill the provider name
    pub fn with_asn_path<P: AsRef<Path>>(mut self, asn_db: P) -> Result<Self> {
        let path = asn_db.as_ref();
        let reader = Reader::open_readfile(path)
            .with_context(|| format!("failed to open asn database {}", path.display()))?;
        self.asn = Some(Arc::new(reader));
        Ok(self)
    }

    fn lookup_city(&self, ip: IpAddr) -> Result<(String, String)> {
        let city: Option<geoip2::City> = self.city.lookup(ip)?.decode()?;
        let Some(city) = city else {
            return Ok((String::new(), String::new()));
        };

        let country = city
            .country
            .names
            .english
            .or(city.country.iso_code)
            .map(String::from)
            .unwrap_or_default();
        let city_name = city.city.names.english.map(String::from).unwrap_or_default();

        Ok((country, city_name))
    }

    fn lookup_provider(&self, ip: IpAddr) -> Result<String> {
        let Some(reader) = &self.asn else {
            return Ok(String::new());
        };
        let asn: Option<geoip2::Asn> = reader.lookup(ip)?.decode()?;
        Ok(asn
            .and_then(|asn| asn.autonomous_system_organization)
            .map(String::from)
            .unwrap_or_default())
    }
}

impl GeoResolver for MmdbResolver {
    fn lookup(&self, ip: &str) -> Result<GeoInfo> {
        let ip = parse_ip(ip)?;
        let (country, city) = self.lookup_city(ip)?;
        let isp = self.lookup_provider(ip)?;
        Ok(GeoInfo { country, city, isp })
    }
}
