//! 加盐哈希假名生成
//!
//! `pseudonym = SHA1(family_name || given_name || birth_date_iso || salt)`，
//! 以大写十六进制输出。盐值每个身份随机生成一次，丢失盐表后假名不可逆。

use chrono::NaiveDate;
use deid_core::{DeidError, Result};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

/// 盐值字节数
pub const SALT_LEN: usize = 32;
/// 假名字节数（160位）
pub const PSEUDONYM_LEN: usize = 20;

/// 单个身份的随机盐
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    /// 从密码学安全随机源生成新盐
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; SALT_LEN];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(value: &str) -> Result<Self> {
        let mut bytes = [0u8; SALT_LEN];
        hex::decode_to_slice(value.trim(), &mut bytes)
            .map_err(|e| DeidError::Validation(format!("盐值格式无效: {}", e)))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Salt(..)")
    }
}

/// 160位假名
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pseudonym([u8; PSEUDONYM_LEN]);

impl Pseudonym {
    /// 由不可变的人口学字段和盐计算假名
    pub fn derive(family_name: &str, given_name: &str, birth_date: NaiveDate, salt: &Salt) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(family_name.as_bytes());
        hasher.update(given_name.as_bytes());
        hasher.update(birth_date.format("%Y-%m-%d").to_string().as_bytes());
        hasher.update(salt.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; PSEUDONYM_LEN] {
        &self.0
    }
}

impl fmt::Display for Pseudonym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Pseudonym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pseudonym({})", self)
    }
}

impl FromStr for Pseudonym {
    type Err = DeidError;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.len() != PSEUDONYM_LEN * 2 {
            return Err(DeidError::Validation(format!(
                "假名长度应为 {} 个十六进制字符: {}",
                PSEUDONYM_LEN * 2,
                value
            )));
        }
        let mut bytes = [0u8; PSEUDONYM_LEN];
        hex::decode_to_slice(value, &mut bytes)
            .map_err(|e| DeidError::Validation(format!("假名格式无效: {}", e)))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Pseudonym {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pseudonym {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_known_digest() {
        // 全零盐的参考值，与独立计算的 SHA1("DoeJane1980-01-01" || 0x00 * 32) 一致
        let salt = Salt::from_bytes([0u8; SALT_LEN]);
        let pseudonym = Pseudonym::derive("Doe", "Jane", date(1980, 1, 1), &salt);

        let mut hasher = Sha1::new();
        hasher.update(b"DoeJane1980-01-01");
        hasher.update([0u8; SALT_LEN]);
        let expected = hex::encode_upper(hasher.finalize());

        assert_eq!(pseudonym.to_string(), expected);
        assert_eq!(pseudonym.to_string().len(), 40);
        assert!(pseudonym.to_string().chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_determinism() {
        let mut rng = StdRng::seed_from_u64(7);
        let salt = Salt::generate(&mut rng);
        let a = Pseudonym::derive("Doe", "Jane", date(1980, 1, 1), &salt);
        let b = Pseudonym::derive("Doe", "Jane", date(1980, 1, 1), &salt);
        assert_eq!(a, b);
    }

    #[test]
    fn test_sensitivity_to_each_field() {
        let mut rng = StdRng::seed_from_u64(7);
        let salt = Salt::generate(&mut rng);
        let other_salt = Salt::generate(&mut rng);
        let base = Pseudonym::derive("Doe", "Jane", date(1980, 1, 1), &salt);

        assert_ne!(base, Pseudonym::derive("Roe", "Jane", date(1980, 1, 1), &salt));
        assert_ne!(base, Pseudonym::derive("Doe", "John", date(1980, 1, 1), &salt));
        assert_ne!(base, Pseudonym::derive("Doe", "Jane", date(1980, 1, 2), &salt));
        assert_ne!(base, Pseudonym::derive("Doe", "Jane", date(1980, 1, 1), &other_salt));
    }

    #[test]
    fn test_fresh_salts_differ() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = Salt::generate(&mut rng);
        let b = Salt::generate(&mut rng);
        assert_ne!(a, b);
    }

    #[test]
    fn test_text_forms() {
        let salt = Salt::from_bytes([0xAB; SALT_LEN]);
        assert_eq!(Salt::from_hex(&salt.to_hex()).unwrap(), salt);
        assert!(Salt::from_hex("abcd").is_err());
        assert_eq!(format!("{:?}", salt), "Salt(..)");

        let pseudonym = Pseudonym::derive("Doe", "Jane", date(1980, 1, 1), &salt);
        let parsed: Pseudonym = pseudonym.to_string().parse().unwrap();
        assert_eq!(parsed, pseudonym);
        assert!("XYZ".parse::<Pseudonym>().is_err());
        assert!("Z".repeat(40).parse::<Pseudonym>().is_err());
    }
}
