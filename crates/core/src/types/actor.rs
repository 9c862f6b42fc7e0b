//! The authenticated caller of an engine operation.
//!
//! Authentication itself lives outside this system; whatever fronts the
//! engine hands over an [`Actor`] and every operation takes it explicitly.

use serde::{Deserialize, Serialize};

use super::id::{StoreId, UserId};

/// Marketplace role of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The customer who placed the order.
    Buyer,
    /// A partner store owner.
    Seller,
    /// Platform operator with access to every store.
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buyer => write!(f, "buyer"),
            Self::Seller => write!(f, "seller"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(Self::Buyer),
            "seller" | "partner" => Ok(Self::Seller),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("invalid role: {s}")),
        }
    }
}

/// Who is performing an operation.
///
/// For a buyer `id` is the auth uid; for a seller it is the store id they
/// operate; for an admin it is the operator's uid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub role: Role,
    pub id: String,
}

impl Actor {
    /// A buyer acting as `uid`.
    #[must_use]
    pub fn buyer(uid: &UserId) -> Self {
        Self {
            role: Role::Buyer,
            id: uid.as_str().to_owned(),
        }
    }

    /// A seller operating `store`.
    #[must_use]
    pub fn seller(store: &StoreId) -> Self {
        Self {
            role: Role::Seller,
            id: store.as_str().to_owned(),
        }
    }

    /// A platform administrator.
    #[must_use]
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            role: Role::Admin,
            id: id.into(),
        }
    }

    /// Whether this actor is the given buyer.
    #[must_use]
    pub fn is_buyer(&self, uid: &UserId) -> bool {
        self.role == Role::Buyer && self.id == uid.as_str()
    }

    /// Whether this actor operates the given store.
    #[must_use]
    pub fn is_seller_of(&self, store: &StoreId) -> bool {
        self.role == Role::Seller && self.id == store.as_str()
    }

    /// Whether this actor acts on the store side (owning seller or admin).
    #[must_use]
    pub fn acts_for_store(&self, store: &StoreId) -> bool {
        self.role == Role::Admin || self.is_seller_of(store)
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing_accepts_partner_alias() {
        assert_eq!("partner".parse::<Role>(), Ok(Role::Seller));
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert!("courier".parse::<Role>().is_err());
    }

    #[test]
    fn test_store_side_membership() {
        let store = StoreId::new("store-1");
        assert!(Actor::seller(&store).acts_for_store(&store));
        assert!(Actor::admin("op-7").acts_for_store(&store));
        assert!(!Actor::seller(&StoreId::new("store-2")).acts_for_store(&store));
        assert!(!Actor::buyer(&UserId::new("store-1")).acts_for_store(&store));
    }
}
