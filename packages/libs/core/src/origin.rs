//! 요청 출처 분류
//!
//! 요청마다 한 번, 전송 계층 피어 주소를 신뢰 네트워크(CIDR)와 대조해 `Internal`/`External`로 분류합니다.
//! 관리 작업은 `Internal`에서만 허용됩니다.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Error, Result};

/// 기본 신뢰 네트워크 (loopback + RFC 1918)
pub const DEFAULT_TRUSTED_NETWORKS: [&str; 5] = [
    "127.0.0.0/8",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "::1/128",
];

/// 요청 출처
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Internal,
    External,
}

impl Origin {
    pub fn is_internal(&self) -> bool {
        matches!(self, Origin::Internal)
    }
}

/// CIDR 네트워크
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    /// IPv4-mapped IPv6 대역(`::ffff:a.b.c.d/96` 이상)은 IPv4 대역으로 정규화합니다.
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(Error::InvalidNetwork {
                value: format!("{addr}/{prefix}"),
            });
        }

        if let IpAddr::V6(v6) = addr {
            if let Some(v4) = v6.to_ipv4_mapped() {
                if prefix >= 96 {
                    return Ok(Self {
                        addr: IpAddr::V4(v4),
                        prefix: prefix - 96,
                    });
                }
            }
        }

        Ok(Self { addr, prefix })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix))
                };
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix))
                };
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

impl FromStr for IpNetwork {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::InvalidNetwork {
            value: s.to_string(),
        };

        match s.split_once('/') {
            Some((addr, prefix)) => {
                let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
                let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
                Self::new(addr, prefix)
            }
            None => {
                let addr: IpAddr = s.parse().map_err(|_| invalid())?;
                let prefix = if addr.is_ipv4() { 32 } else { 128 };
                Self::new(addr, prefix)
            }
        }
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// 분류 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOrigin {
    pub origin: Origin,

    /// 분류에 사용된 클라이언트 주소
    pub client_ip: Option<IpAddr>,
}

fn unresolved() -> ClientOrigin {
    ClientOrigin {
        origin: Origin::External,
        client_ip: None,
    }
}

/// 출처 분류기
#[derive(Debug, Clone)]
pub struct OriginGuard {
    networks: Vec<IpNetwork>,
    trust_forwarded_for: bool,
}

impl Default for OriginGuard {
    fn default() -> Self {
        let networks = DEFAULT_TRUSTED_NETWORKS
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        Self {
            networks,
            trust_forwarded_for: false,
        }
    }
}

impl OriginGuard {
    pub fn new(networks: Vec<IpNetwork>, trust_forwarded_for: bool) -> Self {
        Self {
            networks,
            trust_forwarded_for,
        }
    }

    /// CIDR 문자열 목록에서 생성
    pub fn from_cidrs<S: AsRef<str>>(cidrs: &[S], trust_forwarded_for: bool) -> Result<Self> {
        let networks = cidrs
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<IpNetwork>>>()?;
        Ok(Self::new(networks, trust_forwarded_for))
    }

    pub fn networks(&self) -> &[IpNetwork] {
        &self.networks
    }

    pub fn trusts_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }

    pub fn classify_ip(&self, ip: IpAddr) -> Origin {
        if self.networks.iter().any(|n| n.contains(ip)) {
            Origin::Internal
        } else {
            Origin::External
        }
    }

    /// 요청 분류
    ///
    /// 피어가 신뢰 네트워크에 있고 `trust_forwarded_for`가 켜져 있을 때만 전달 헤더를 봅니다.
    /// `X-Forwarded-For`는 오른쪽부터 읽으며 신뢰 네트워크 안의 hop을 건너뛰고,
    /// 처음 만나는 신뢰 밖 주소로 분류합니다. 모든 hop이 신뢰 네트워크면 가장 왼쪽 주소를 씁니다.
    /// `X-Real-IP`는 `X-Forwarded-For`가 없을 때만 사용합니다.
    /// 해석할 수 없는 주소는 `External`입니다.
    pub fn classify(
        &self,
        peer: Option<IpAddr>,
        forwarded_for: Option<&str>,
        real_ip: Option<&str>,
    ) -> ClientOrigin {
        let Some(peer) = peer else {
            return unresolved();
        };

        if self.trust_forwarded_for && self.classify_ip(peer).is_internal() {
            let forwarded_for = forwarded_for.map(str::trim).filter(|v| !v.is_empty());
            let real_ip = real_ip.map(str::trim).filter(|v| !v.is_empty());

            if let Some(chain) = forwarded_for {
                return self.classify_chain(chain);
            }
            if let Some(raw) = real_ip {
                return match raw.parse::<IpAddr>() {
                    Ok(ip) => ClientOrigin {
                        origin: self.classify_ip(ip),
                        client_ip: Some(ip),
                    },
                    Err(_) => unresolved(),
                };
            }
        }

        ClientOrigin {
            origin: self.classify_ip(peer),
            client_ip: Some(peer),
        }
    }

    /// `X-Forwarded-For` 체인 분류 (오른쪽부터)
    fn classify_chain(&self, chain: &str) -> ClientOrigin {
        let mut leftmost = None;
        for raw in chain.rsplit(',').map(str::trim) {
            let Ok(ip) = raw.parse::<IpAddr>() else {
                return unresolved();
            };
            if !self.classify_ip(ip).is_internal() {
                return ClientOrigin {
                    origin: Origin::External,
                    client_ip: Some(ip),
                };
            }
            leftmost = Some(ip);
        }

        match leftmost {
            Some(ip) => ClientOrigin {
                origin: Origin::Internal,
                client_ip: Some(ip),
            },
            None => unresolved(),
        }
    }

    /// 관리 작업 허용 여부
    pub fn require_internal(&self, origin: Origin) -> Result<()> {
        match origin {
            Origin::Internal => Ok(()),
            Origin::External => Err(Error::OriginForbidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_default_networks() {
        let guard = OriginGuard::default();
        assert_eq!(guard.classify_ip(ip("127.0.0.1")), Origin::Internal);
        assert_eq!(guard.classify_ip(ip("10.20.30.40")), Origin::Internal);
        assert_eq!(guard.classify_ip(ip("172.16.0.1")), Origin::Internal);
        assert_eq!(guard.classify_ip(ip("172.31.255.255")), Origin::Internal);
        assert_eq!(guard.classify_ip(ip("192.168.1.1")), Origin::Internal);
        assert_eq!(guard.classify_ip(ip("::1")), Origin::Internal);

        assert_eq!(guard.classify_ip(ip("172.32.0.1")), Origin::External);
        assert_eq!(guard.classify_ip(ip("8.8.8.8")), Origin::External);
        assert_eq!(guard.classify_ip(ip("2001:db8::1")), Origin::External);
    }

    #[test]
    fn test_ipv4_mapped_ipv6() {
        let guard = OriginGuard::default();
        assert_eq!(guard.classify_ip(ip("::ffff:127.0.0.1")), Origin::Internal);
        assert_eq!(guard.classify_ip(ip("::ffff:8.8.8.8")), Origin::External);
    }

    #[test]
    fn test_parse_network() {
        assert_eq!("10.0.0.0/8".parse::<IpNetwork>().unwrap().to_string(), "10.0.0.0/8");
        assert_eq!("1.2.3.4".parse::<IpNetwork>().unwrap().to_string(), "1.2.3.4/32");
        assert!("10.0.0.0/33".parse::<IpNetwork>().is_err());
        assert!("not-an-ip/8".parse::<IpNetwork>().is_err());

        let any: IpNetwork = "0.0.0.0/0".parse().unwrap();
        assert!(any.contains(ip("203.0.113.9")));
    }

    #[test]
    fn test_forwarded_for_only_from_trusted_peer() {
        let guard = OriginGuard::from_cidrs(&["10.0.0.0/8"], true).unwrap();

        // 신뢰 프록시 뒤의 외부 클라이언트
        let c = guard.classify(Some(ip("10.0.0.2")), Some("8.8.8.8, 10.0.0.2"), None);
        assert_eq!(c.origin, Origin::External);
        assert_eq!(c.client_ip, Some(ip("8.8.8.8")));

        // 외부 피어가 헤더를 위조해도 무시
        let c = guard.classify(Some(ip("8.8.8.8")), Some("10.1.1.1"), None);
        assert_eq!(c.origin, Origin::External);

        // X-Real-IP fallback
        let c = guard.classify(Some(ip("10.0.0.2")), None, Some("10.9.9.9"));
        assert_eq!(c.origin, Origin::Internal);

        // 해석 불가 → External
        let c = guard.classify(Some(ip("10.0.0.2")), Some("garbage"), None);
        assert_eq!(c.origin, Origin::External);
        let c = guard.classify(Some(ip("10.0.0.2")), Some("10.1.1.1, , 10.0.0.3"), None);
        assert_eq!(c.origin, Origin::External);
        assert_eq!(c.client_ip, None);
    }

    #[test]
    fn test_forwarded_for_spoofed_prefix() {
        let guard = OriginGuard::from_cidrs(&["127.0.0.0/8", "10.0.0.0/8"], true).unwrap();

        // 클라이언트가 보낸 왼쪽 항목은 무시하고 오른쪽부터 첫 외부 주소
        let c = guard.classify(Some(ip("10.0.0.2")), Some("127.0.0.1, 203.0.113.10"), None);
        assert_eq!(c.origin, Origin::External);
        assert_eq!(c.client_ip, Some(ip("203.0.113.10")));

        // 신뢰 hop 여러 개를 건너뜀
        let c = guard.classify(
            Some(ip("10.0.0.2")),
            Some("10.0.0.1, 198.51.100.7, 10.0.0.9, 10.0.0.8"),
            None,
        );
        assert_eq!(c.origin, Origin::External);
        assert_eq!(c.client_ip, Some(ip("198.51.100.7")));

        // 모든 hop이 신뢰 네트워크
        let c = guard.classify(Some(ip("10.0.0.2")), Some("10.5.5.5, 10.0.0.9"), None);
        assert_eq!(c.origin, Origin::Internal);
        assert_eq!(c.client_ip, Some(ip("10.5.5.5")));

        // X-Forwarded-For가 있으면 X-Real-IP는 보지 않음
        let c = guard.classify(Some(ip("10.0.0.2")), Some("203.0.113.10"), Some("127.0.0.1"));
        assert_eq!(c.origin, Origin::External);
    }

    #[test]
    fn test_ipv4_mapped_network() {
        let net: IpNetwork = "::ffff:10.0.0.0/104".parse().unwrap();
        assert_eq!(net.to_string(), "10.0.0.0/8");
        assert!(net.contains(ip("10.1.2.3")));
        assert!(net.contains(ip("::ffff:10.1.2.3")));
        assert!(!net.contains(ip("11.0.0.1")));

        let guard = OriginGuard::from_cidrs(&["::ffff:192.168.0.0/112"], false).unwrap();
        assert_eq!(guard.classify_ip(ip("192.168.4.4")), Origin::Internal);

        // 96 미만은 IPv6 대역 그대로
        let wide: IpNetwork = "::ffff:0.0.0.0/80".parse().unwrap();
        assert!(wide.to_string().contains(':'));
    }

    #[test]
    fn test_forwarded_for_ignored_when_disabled() {
        let guard = OriginGuard::default();
        let c = guard.classify(Some(ip("127.0.0.1")), Some("8.8.8.8"), None);
        assert_eq!(c.origin, Origin::Internal);
        assert_eq!(guard.classify(None, None, None).origin, Origin::External);
    }

    #[test]
    fn test_require_internal() {
        let guard = OriginGuard::default();
        assert!(guard.require_internal(Origin::Internal).is_ok());
        assert!(matches!(
            guard.require_internal(Origin::External),
            Err(Error::OriginForbidden)
        ));
    }
}
