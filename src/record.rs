use std::collections::HashMap;

use crate::config::ScalarField;

/// Placeholder for anything that could not be extracted.
pub const NA: &str = "N/A";

/// What one product page yielded. Scalars are always present (possibly
/// `N/A`); `specs` holds whatever label/value pairs the page carried.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub url: String,
    pub title: String,
    pub rating: String,
    pub reviews: String,
    pub final_price: String,
    pub original_price: String,
    pub discount: String,
    pub seller: String,
    pub specs: HashMap<String, String>,
}

impl ProductRecord {
    pub fn empty(url: &str) -> Self {
        ProductRecord {
            url: url.to_string(),
            title: NA.into(),
            rating: NA.into(),
            reviews: NA.into(),
            final_price: NA.into(),
            original_price: NA.into(),
            discount: NA.into(),
            seller: NA.into(),
            specs: HashMap::new(),
        }
    }

    pub fn scalar(&self, field: ScalarField) -> &str {
        match field {
            ScalarField::Title => &self.title,
            ScalarField::Rating => &self.rating,
            ScalarField::Reviews => &self.reviews,
            ScalarField::FinalPrice => &self.final_price,
            ScalarField::OriginalPrice => &self.original_price,
            ScalarField::Discount => &self.discount,
            ScalarField::Seller => &self.seller,
            ScalarField::Url => &self.url,
        }
    }

    pub fn scalar_mut(&mut self, field: ScalarField) -> &mut String {
        match field {
            ScalarField::Title => &mut self.title,
            ScalarField::Rating => &mut self.rating,
            ScalarField::Reviews => &mut self.reviews,
            ScalarField::FinalPrice => &mut self.final_price,
            ScalarField::OriginalPrice => &mut self.original_price,
            ScalarField::Discount => &mut self.discount,
            ScalarField::Seller => &mut self.seller,
            ScalarField::Url => &mut self.url,
        }
    }
}
