//! Purchase requests, their line items and the draft used to create them
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Mul};
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::role::Actor;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Fixed-point currency amount, two decimal places.
// newtype wrapper because Decimal doesn't implement minicbor traits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }
    pub fn amount(&self) -> Decimal {
        self.0
    }
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
    /// Absolute distance between two amounts, `None` if it overflows
    pub fn distance(&self, other: &Money) -> Option<Decimal> {
        self.0.checked_sub(other.0).map(|d| d.abs())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Money)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Mul<u32> for Money {
    type Output = Money;

    fn mul(self, rhs: u32) -> Money {
        Money(self.0 * Decimal::from(rhs))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<C> minicbor::Encode<C> for Money {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0.serialize())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Money {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let raw: [u8; 16] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("decimal must be 16 bytes"))?;

        Ok(Money(Decimal::deserialize(raw)))
    }
}

// at most ten digits, two of them after the point
fn validate_money(amount: Decimal) -> Result<Money, ValidationError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ValidationError::NegativeAmount(amount));
    }
    if amount.normalize().scale() > 2 {
        return Err(ValidationError::ExcessPrecision(amount));
    }
    if amount >= Decimal::from(100_000_000) {
        return Err(ValidationError::AmountOutOfRange(amount));
    }
    Ok(Money(amount.round_dp(2)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum RequestStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to a stored document (proforma, receipt or purchase order).
#[derive(Debug, Clone, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub struct DocumentRef(#[n(0)] pub String);

impl DocumentRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct LineItem {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub unit_price: Money,
    #[n(2)]
    pub quantity: u32,
}

impl LineItem {
    pub fn new(name: impl Into<String>, unit_price: Money, quantity: u32) -> Self {
        Self {
            name: name.into(),
            unit_price,
            quantity,
        }
    }
    pub fn total(&self) -> Money {
        self.unit_price * self.quantity
    }
}

// Items live in their own tree, keyed by the request id, see [`crate::store`]
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct PurchaseRequest {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub description: String,
    #[n(3)]
    pub amount: Money,
    #[n(4)]
    pub status: RequestStatus,
    #[n(5)]
    pub created_by: String,
    #[n(6)]
    pub requester_name: String,
    #[n(7)]
    pub approved_by: Vec<String>, // mirrors approved ledger records
    #[n(8)]
    pub proforma: Option<DocumentRef>,
    #[n(9)]
    pub receipt: Option<DocumentRef>,
    #[n(10)]
    pub purchase_order: Option<DocumentRef>,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
    #[n(12)]
    pub updated_at: TimeStamp<Utc>,
}

impl PurchaseRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
    pub fn is_owned_by(&self, actor: &Actor) -> bool {
        self.created_by == actor.id
    }
}

/// A request together with the line items it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSnapshot {
    pub request: PurchaseRequest,
    pub items: Vec<LineItem>,
}

impl RequestSnapshot {
    pub fn id(&self) -> &str {
        &self.request.id
    }
    pub fn status(&self) -> RequestStatus {
        self.request.status
    }
    pub fn items_total(&self) -> Money {
        self.items.iter().map(LineItem::total).sum()
    }
}

// used for constructing new requests
#[derive(Debug, Default, Clone)]
pub struct RequestDraft {
    title: String,
    description: String,
    amount: Option<Decimal>,
    items: Vec<(String, Decimal, u32)>,
}

impl RequestDraft {
    /// Construct an empty draft
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
    pub fn set_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }
    pub fn add_item(mut self, name: impl Into<String>, unit_price: Decimal, quantity: u32) -> Self {
        self.items.push((name.into(), unit_price, quantity));
        self
    }
    /// Checks fields and returns the pending request with its items.
    ///
    /// The amount is not reconciled against the item totals.
    pub fn validate_and_finalise(
        &self,
        id: String,
        owner: &Actor,
        now: TimeStamp<Utc>,
    ) -> Result<(PurchaseRequest, Vec<LineItem>), ValidationError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ValidationError::MissingTitle);
        }
        let amount = validate_money(self.amount.ok_or(ValidationError::MissingAmount)?)?;

        let items = self
            .items
            .iter()
            .map(|(name, price, quantity)| {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ValidationError::EmptyItemName);
                }
                if *quantity == 0 {
                    return Err(ValidationError::InvalidQuantity(name.to_string()));
                }
                Ok(LineItem::new(name, validate_money(*price)?, *quantity))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let request = PurchaseRequest {
            id,
            title: title.to_string(),
            description: self.description.clone(),
            amount,
            status: RequestStatus::Pending,
            created_by: owner.id.clone(),
            requester_name: owner.name.clone(),
            approved_by: vec![],
            proforma: None,
            receipt: None,
            purchase_order: None,
            created_at: now.clone(),
            updated_at: now,
        };

        Ok((request, items))
    }
}
