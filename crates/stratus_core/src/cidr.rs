//! IPv4 CIDR blocks and sequential subnet allocation.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DeclarationError, DeclarationResult};

/// An IPv4 network in CIDR notation.
///
/// Host bits must be zero: `10.0.0.0/16` parses, `10.0.0.1/16` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    network: u32,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> DeclarationResult<Self> {
        if prefix > 32 {
            return Err(DeclarationError::InvalidCidr(format!(
                "{}/{}: prefix length must be at most 32",
                addr, prefix
            )));
        }
        let network = u32::from(addr);
        if network & !Self::mask_bits(prefix) != 0 {
            return Err(DeclarationError::InvalidCidr(format!(
                "{}/{}: host bits must be zero",
                addr, prefix
            )));
        }
        Ok(Self { network, prefix })
    }

    /// Build a block from octets, clearing any host bits. Prefixes above 32
    /// are clamped.
    pub fn from_octets(octets: [u8; 4], prefix: u8) -> Self {
        let prefix = prefix.min(32);
        Self {
            network: u32::from(Ipv4Addr::from(octets)) & Self::mask_bits(prefix),
            prefix,
        }
    }

    /// The whole IPv4 space, `0.0.0.0/0`.
    pub fn any() -> Self {
        Self {
            network: 0,
            prefix: 0,
        }
    }

    fn mask_bits(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses in the block.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    fn last(&self) -> u32 {
        self.network | !Self::mask_bits(self.prefix)
    }

    /// Whether this block is open to every address.
    pub fn is_unrestricted(&self) -> bool {
        self.prefix == 0
    }

    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        other.prefix >= self.prefix && other.network & Self::mask_bits(self.prefix) == self.network
    }

    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.network <= other.last() && other.network <= self.last()
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = DeclarationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DeclarationError::InvalidCidr(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        Self::new(addr, prefix)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = DeclarationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
    }
}

/// Carves consecutive, non-overlapping subnets out of a parent block.
#[derive(Debug, Clone)]
pub struct CidrAllocator {
    block: Ipv4Cidr,
    next: u64,
    allocated: Vec<Ipv4Cidr>,
}

impl CidrAllocator {
    pub fn new(block: Ipv4Cidr) -> Self {
        Self {
            block,
            next: u64::from(block.network),
            allocated: Vec::new(),
        }
    }

    /// Allocate the next free block with the given prefix length.
    pub fn allocate(&mut self, prefix: u8) -> DeclarationResult<Ipv4Cidr> {
        if prefix < self.block.prefix || prefix > 32 {
            return Err(DeclarationError::InvalidCidr(format!(
                "/{} cannot be carved from {}",
                prefix, self.block
            )));
        }
        let size = 1u64 << (32 - u32::from(prefix));
        // Align up to the requested block size.
        let start = self.next.div_ceil(size) * size;
        let end = start + size - 1;
        if end > u64::from(self.block.last()) {
            return Err(DeclarationError::AddressSpaceExhausted(format!(
                "no room for another /{} in {}",
                prefix, self.block
            )));
        }
        let cidr = Ipv4Cidr {
            network: start as u32,
            prefix,
        };
        self.next = end + 1;
        self.allocated.push(cidr);
        Ok(cidr)
    }

    pub fn allocated(&self) -> &[Ipv4Cidr] {
        &self.allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let cidr: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        assert_eq!(cidr.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(cidr.prefix(), 16);
        assert_eq!(cidr.size(), 65536);
        assert_eq!(cidr.to_string(), "10.0.0.0/16");
    }

    #[test]
    fn test_malformed_blocks_are_rejected() {
        assert!("10.0.0.1/16".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.300.0/24".parse::<Ipv4Cidr>().is_err());
    }

    #[test]
    fn test_from_octets_clears_host_bits() {
        assert_eq!(Ipv4Cidr::from_octets([10, 0, 0, 7], 16).to_string(), "10.0.0.0/16");
        assert_eq!(Ipv4Cidr::from_octets([10, 0, 0, 0], 40).prefix(), 32);
    }

    #[test]
    fn test_any_is_unrestricted() {
        let any: Ipv4Cidr = "0.0.0.0/0".parse().unwrap();
        assert_eq!(any, Ipv4Cidr::any());
        assert!(any.is_unrestricted());
        assert!(any.contains(&"10.0.0.0/8".parse().unwrap()));
    }

    #[test]
    fn test_overlap_and_containment() {
        let vpc: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        let a: Ipv4Cidr = "10.0.1.0/24".parse().unwrap();
        let b: Ipv4Cidr = "10.0.2.0/24".parse().unwrap();
        let other: Ipv4Cidr = "10.1.0.0/16".parse().unwrap();

        assert!(vpc.contains(&a));
        assert!(!a.contains(&vpc));
        assert!(vpc.overlaps(&a));
        assert!(!a.overlaps(&b));
        assert!(!vpc.overlaps(&other));
    }

    #[test]
    fn test_sequential_allocation() {
        let mut allocator = CidrAllocator::new("10.0.0.0/16".parse().unwrap());
        let subnets: Vec<String> = (0..4)
            .map(|_| allocator.allocate(24).unwrap().to_string())
            .collect();
        assert_eq!(
            subnets,
            vec!["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24", "10.0.3.0/24"]
        );
    }

    #[test]
    fn test_allocation_aligns_mixed_sizes() {
        let mut allocator = CidrAllocator::new("10.0.0.0/16".parse().unwrap());
        assert_eq!(allocator.allocate(26).unwrap().to_string(), "10.0.0.0/26");
        assert_eq!(allocator.allocate(24).unwrap().to_string(), "10.0.1.0/24");
    }

    #[test]
    fn test_allocation_exhausts() {
        let mut allocator = CidrAllocator::new("10.0.0.0/23".parse().unwrap());
        allocator.allocate(24).unwrap();
        allocator.allocate(24).unwrap();
        assert!(matches!(
            allocator.allocate(24),
            Err(DeclarationError::AddressSpaceExhausted(_))
        ));
        assert!(allocator.allocate(22).is_err());
    }
}
