//! 권한 모델
//!
//! 권한은 `read`, `write`, `admin` 세 가지로 닫혀 있으며 `admin`은 나머지를 모두 포함합니다.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// 단일 권한
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl Permission {
    pub const ALL: [Permission; 3] = [Permission::Read, Permission::Write, Permission::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "admin" => Ok(Permission::Admin),
            other => Err(Error::InvalidPermission {
                value: other.to_string(),
            }),
        }
    }
}

/// 권한 집합
///
/// 중복 없이 정렬된 상태로 보관하며, 직렬화 시 문자열 배열이 됩니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new(permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self(permissions.into_iter().collect())
    }

    /// `read`만 가진 기본 집합
    pub fn read_only() -> Self {
        Self::new([Permission::Read])
    }

    /// `admin` 집합 (레거시 키에 부여)
    pub fn admin() -> Self {
        Self::new([Permission::Admin])
    }

    /// 콤마 구분 문자열 파싱 (`"read,write"`)
    pub fn parse_list(input: &str) -> Result<Self, Error> {
        input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Permission::from_str)
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    /// 문자열 목록 파싱
    pub fn from_strings<S: AsRef<str>>(values: &[S]) -> Result<Self, Error> {
        values
            .iter()
            .map(|v| Permission::from_str(v.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    /// 권한 허용 여부 (`admin`은 모든 권한을 포함)
    pub fn allows(&self, permission: Permission) -> bool {
        self.0.contains(&permission) || self.0.contains(&Permission::Admin)
    }

    /// 다른 집합의 모든 권한을 허용하는지 확인
    pub fn covers(&self, other: &PermissionSet) -> bool {
        other.iter().all(|p| self.allows(p))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.iter().map(|p| p.as_str().to_string()).collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(",");
        f.write_str(&joined)
    }
}
