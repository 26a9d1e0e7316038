//! Raw form input turned into create payloads.

use crate::models::{NewProperty, NewUser};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyForm {
    pub address: String,
    pub unit: String,
    pub bedrooms: String,
    pub bathrooms: String,
    pub rent: String,
    pub property_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResidentForm {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub unit: String,
    pub lease_start: String,
    pub lease_end: String,
    pub monthly_rent: String,
    pub security_deposit: String,
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn decimal(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

impl PropertyForm {
    /// Missing or unparseable numbers default to one bedroom, one bathroom
    /// and zero rent. New properties start out available.
    pub fn into_new_property(self) -> NewProperty {
        NewProperty {
            unit: non_empty(&self.unit),
            bedrooms: self
                .bedrooms
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(1),
            bathrooms: decimal(&self.bathrooms).filter(|n| *n != 0.0).unwrap_or(1.0),
            rent: decimal(&self.rent).unwrap_or(0.0),
            status: "available".to_string(),
            address: self.address.trim().to_string(),
            property_type: self.property_type,
        }
    }
}

impl ResidentForm {
    pub fn into_new_user(self) -> NewUser {
        NewUser {
            email: self.email.trim().to_string(),
            full_name: self.name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            role: "resident".to_string(),
            unit: non_empty(&self.unit),
            monthly_rent: decimal(&self.monthly_rent),
            security_deposit: decimal(&self.security_deposit),
            lease_start: non_empty(&self.lease_start),
            lease_end: non_empty(&self.lease_end),
        }
    }
}
