//! Cart id → display name table.
//!
//! Built once from [`ReaderConfig::carts`] and never modified afterwards.
//!
//! [`ReaderConfig::carts`]: crate::config::ReaderConfig::carts

use heapless::FnvIndexMap;

use crate::config::{CartConfig, CartId, CartName, MAX_CARTS};
use crate::error::ConfigError;

#[derive(Debug, Clone, Default)]
pub struct CartRegistry {
    names: FnvIndexMap<CartId, CartName, MAX_CARTS>,
}

impl CartRegistry {
    pub fn from_config(carts: &[CartConfig]) -> Result<Self, ConfigError> {
        let mut names = FnvIndexMap::new();
        for cart in carts {
            if names.contains_key(&cart.cart_id) {
                return Err(ConfigError::DuplicateCart);
            }
            names
                .insert(cart.cart_id.clone(), cart.name.clone())
                .map_err(|_| ConfigError::TooManyCarts)?;
        }
        Ok(Self { names })
    }

    /// Display name configured for `cart_id`.
    pub fn lookup(&self, cart_id: &str) -> Option<&str> {
        let mut key = CartId::new();
        key.push_str(cart_id).ok()?;
        self.names.get(&key).map(CartName::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names.iter().map(|(id, name)| (id.as_str(), name.as_str()))
    }
}
