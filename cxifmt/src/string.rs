use core::{fmt, str};

use std::borrow::Cow;

use crate::error::BuildError;

#[derive(Clone)]
#[repr(transparent)]
pub struct SizedCString<const SIZE: usize>([u8; SIZE]);

impl<const SIZE: usize> SizedCString<SIZE> {
    #[must_use]
    pub fn as_str(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(&self.0)
    }
    #[must_use]
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0)
    }
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.0
    }
}

impl<const SIZE: usize> From<[u8; SIZE]> for SizedCString<SIZE> {
    fn from(other: [u8; SIZE]) -> SizedCString<SIZE> {
        SizedCString(other)
    }
}

impl<const SIZE: usize> TryFrom<&str> for SizedCString<SIZE> {
    type Error = BuildError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let bytes = value.as_bytes();
        if bytes.len() > SIZE {
            return Err(BuildError::StringTooBig);
        }
        let mut data = [0u8; SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(data))
    }
}

#[derive(Clone)]
#[repr(C)]
pub struct SizedCStringUtf16<const SIZE: usize> {
    data: [u16; SIZE],
}

impl<const SIZE: usize> SizedCStringUtf16<SIZE> {
    #[must_use]
    pub fn to_string(&self) -> Result<String, std::string::FromUtf16Error> {
        String::from_utf16(&self.data)
    }
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.data)
    }
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|v| *v == 0)
    }
    #[must_use]
    pub fn data(&self) -> &[u16] {
        &self.data
    }
}

impl<const SIZE: usize> TryFrom<&str> for SizedCStringUtf16<SIZE> {
    type Error = BuildError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut data: Vec<u16> = value.encode_utf16().collect();
        if data.len() > SIZE {
            return Err(BuildError::StringTooBig);
        }
        data.resize(SIZE, 0u16);
        Ok(Self {
            data: data.try_into().unwrap(),
        })
    }
}

impl<const SIZE: usize> fmt::Debug for SizedCString<SIZE> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_fmt(format_args!("\"{}\"", self.to_string_lossy()))
    }
}

impl<const SIZE: usize> fmt::Debug for SizedCStringUtf16<SIZE> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_fmt(format_args!("\"{}\"", self.to_string_lossy()))
    }
}

#[cfg(test)]
mod tests {
    use super::SizedCString;

    #[test]
    fn pads_with_zero() {
        let s: SizedCString<8> = "CTR-P".try_into().unwrap();
        assert_eq!(s.data(), b"CTR-P\0\0\0");
    }

    #[test]
    fn rejects_too_long() {
        let res: Result<SizedCString<4>, _> = "toolong".try_into();
        assert!(res.is_err());
    }
}
