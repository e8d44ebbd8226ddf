use std::io::Write;

use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("{what} is already {status} and can no longer change")]
    Terminal { what: &'static str, status: String },
    #[error("cannot move {what} from {from} to {to}")]
    NotAllowed {
        what: &'static str,
        from: String,
        to: String,
    },
    #[error("the {party} cannot {action} a {status} negotiation")]
    WrongParty {
        party: Party,
        action: NegotiationAction,
        status: NegotiationStatus,
    },
}

/// Text-backed enums: string conversions plus the diesel `Text` mapping.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                Ok(raw.parse()?)
            }
        }
    };
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    PendingPickup,
    Sold,
    Deleted,
}

text_enum!(ListingStatus {
    Active => "active",
    PendingPickup => "pending_pickup",
    Sold => "sold",
    Deleted => "deleted",
});

impl ListingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sold | Self::Deleted)
    }

    pub fn check_transition(&self, to: ListingStatus) -> Result<(), TransitionError> {
        use ListingStatus::*;

        if self.is_terminal() {
            return Err(TransitionError::Terminal {
                what: "listing",
                status: self.to_string(),
            });
        }
        match (self, to) {
            (Active, PendingPickup | Sold | Deleted) => Ok(()),
            (PendingPickup, Active | Sold | Deleted) => Ok(()),
            _ => Err(TransitionError::NotAllowed {
                what: "listing",
                from: self.to_string(),
                to: to.to_string(),
            }),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Pending,
    Countered,
    Accepted,
    Rejected,
}

text_enum!(NegotiationStatus {
    Pending => "pending",
    Countered => "countered",
    Accepted => "accepted",
    Rejected => "rejected",
});

/// Which side of a negotiation is acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Seller,
    Dealer,
}

impl std::fmt::Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Party::Seller => "seller",
            Party::Dealer => "dealer",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationAction {
    Counter,
    Accept,
    Reject,
}

impl std::fmt::Display for NegotiationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            NegotiationAction::Counter => "counter",
            NegotiationAction::Accept => "accept",
            NegotiationAction::Reject => "reject",
        })
    }
}

impl NegotiationStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Countered)
    }

    /// The seller answers a pending offer; the dealer answers a counter.
    pub fn apply(
        &self,
        party: Party,
        action: NegotiationAction,
    ) -> Result<NegotiationStatus, TransitionError> {
        use NegotiationAction::*;
        use NegotiationStatus::*;

        if !self.is_open() {
            return Err(TransitionError::Terminal {
                what: "negotiation",
                status: self.to_string(),
            });
        }
        match (self, party, action) {
            (Pending, Party::Seller, Counter) => Ok(Countered),
            (Pending, Party::Seller, Accept) | (Countered, Party::Dealer, Accept) => Ok(Accepted),
            (Pending, Party::Seller, Reject) | (Countered, Party::Dealer, Reject) => Ok(Rejected),
            _ => Err(TransitionError::WrongParty {
                party,
                action,
                status: *self,
            }),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Declined,
    Cancelled,
}

text_enum!(RequestStatus {
    Pending => "pending",
    Approved => "approved",
    Declined => "declined",
    Cancelled => "cancelled",
});

impl RequestStatus {
    pub fn check_transition(&self, to: RequestStatus) -> Result<(), TransitionError> {
        match (self, to) {
            (Self::Pending, Self::Approved | Self::Declined | Self::Cancelled) => Ok(()),
            (Self::Pending, _) => Err(TransitionError::NotAllowed {
                what: "request",
                from: self.to_string(),
                to: to.to_string(),
            }),
            _ => Err(TransitionError::Terminal {
                what: "request",
                status: self.to_string(),
            }),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Kg,
    Tonne,
    Piece,
}

text_enum!(Unit {
    Kg => "kg",
    Tonne => "tonne",
    Piece => "piece",
});

impl Unit {
    /// Weight used for rewards; a piece counts as one kilogram.
    pub fn kilograms(&self, quantity: f64) -> f64 {
        match self {
            Unit::Kg | Unit::Piece => quantity,
            Unit::Tonne => quantity * 1000.0,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Seller,
    Dealer,
}

text_enum!(Role {
    Seller => "seller",
    Dealer => "dealer",
});

#[cfg(test)]
mod tests {
    use super::*;
    use NegotiationAction::*;

    const LISTING_STATES: [ListingStatus; 4] = [
        ListingStatus::Active,
        ListingStatus::PendingPickup,
        ListingStatus::Sold,
        ListingStatus::Deleted,
    ];

    #[test]
    fn terminal_listing_states_never_move() {
        for from in [ListingStatus::Sold, ListingStatus::Deleted] {
            for to in LISTING_STATES {
                assert!(from.check_transition(to).is_err(), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn open_listing_transitions() {
        use ListingStatus::*;
        assert!(Active.check_transition(PendingPickup).is_ok());
        assert!(Active.check_transition(Sold).is_ok());
        assert!(PendingPickup.check_transition(Active).is_ok());
        assert!(PendingPickup.check_transition(Deleted).is_ok());
        assert!(Active.check_transition(Active).is_err());
        assert!(PendingPickup.check_transition(PendingPickup).is_err());
    }

    #[test]
    fn seller_answers_pending_offer() {
        let pending = NegotiationStatus::Pending;
        assert_eq!(pending.apply(Party::Seller, Counter), Ok(NegotiationStatus::Countered));
        assert_eq!(pending.apply(Party::Seller, Accept), Ok(NegotiationStatus::Accepted));
        assert_eq!(pending.apply(Party::Seller, Reject), Ok(NegotiationStatus::Rejected));
        for action in [Counter, Accept, Reject] {
            assert!(pending.apply(Party::Dealer, action).is_err());
        }
    }

    #[test]
    fn dealer_answers_counter() {
        let countered = NegotiationStatus::Countered;
        assert_eq!(countered.apply(Party::Dealer, Accept), Ok(NegotiationStatus::Accepted));
        assert_eq!(countered.apply(Party::Dealer, Reject), Ok(NegotiationStatus::Rejected));
        assert!(countered.apply(Party::Dealer, Counter).is_err());
        for action in [Counter, Accept, Reject] {
            assert!(countered.apply(Party::Seller, action).is_err());
        }
    }

    #[test]
    fn closed_negotiations_are_terminal() {
        for status in [NegotiationStatus::Accepted, NegotiationStatus::Rejected] {
            for party in [Party::Seller, Party::Dealer] {
                for action in [Counter, Accept, Reject] {
                    assert!(matches!(
                        status.apply(party, action),
                        Err(TransitionError::Terminal { .. })
                    ));
                }
            }
        }
    }

    #[test]
    fn request_only_leaves_pending() {
        assert!(RequestStatus::Pending.check_transition(RequestStatus::Approved).is_ok());
        assert!(RequestStatus::Pending.check_transition(RequestStatus::Pending).is_err());
        assert!(RequestStatus::Declined.check_transition(RequestStatus::Approved).is_err());
    }

    #[test]
    fn text_round_trip() {
        assert_eq!("pending_pickup".parse::<ListingStatus>(), Ok(ListingStatus::PendingPickup));
        assert_eq!(ListingStatus::PendingPickup.to_string(), "pending_pickup");
        assert_eq!(
            serde_json::to_string(&ListingStatus::PendingPickup).unwrap(),
            "\"pending_pickup\""
        );
        assert!("archived".parse::<ListingStatus>().is_err());
    }

    #[test]
    fn tonnes_convert_to_kilograms() {
        assert_eq!(Unit::Tonne.kilograms(1.5), 1500.0);
        assert_eq!(Unit::Piece.kilograms(3.0), 3.0);
    }
}
