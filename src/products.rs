use chrono::NaiveDate;

use crate::error::{AppError, Result};

/// A supported trading pair and the day it first traded on the exchange.
///
/// The API does not expose listing dates; these values have been collected
/// manually and act as the default window start for an empty database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Product {
    pub id: &'static str,
    first_traded: &'static str,
}

pub const PRODUCTS: &[Product] = &[
    Product { id: "BCH-BTC", first_traded: "2018-01-17" },
    Product { id: "BCH-USD", first_traded: "2017-12-20" },
    Product { id: "BCH-EUR", first_traded: "2018-01-24" },
    Product { id: "BTC-EUR", first_traded: "2015-04-23" },
    Product { id: "BTC-USD", first_traded: "2015-01-08" },
    Product { id: "BTC-GBP", first_traded: "2015-04-21" },
    Product { id: "ETH-BTC", first_traded: "2016-05-18" },
    Product { id: "ETH-EUR", first_traded: "2017-05-23" },
    Product { id: "ETH-USD", first_traded: "2016-05-18" },
    Product { id: "LTC-BTC", first_traded: "2016-08-17" },
    Product { id: "LTC-USD", first_traded: "2016-08-17" },
    Product { id: "LTC-EUR", first_traded: "2017-05-22" },
];

impl Product {
    pub fn first_traded(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(self.first_traded, "%Y-%m-%d").map_err(AppError::from)
    }
}

pub fn find(id: &str) -> Option<&'static Product> {
    PRODUCTS.iter().find(|p| p.id == id)
}

/// Resolve the product list for a run: the single requested product, or the
/// full configured set. An unknown symbol is a startup error.
pub fn select(filter: Option<&str>) -> Result<Vec<&'static Product>> {
    match filter {
        Some(id) => find(id)
            .map(|p| vec![p])
            .ok_or_else(|| AppError::UnknownProduct(id.to_string())),
        None => Ok(PRODUCTS.iter().collect()),
    }
}
