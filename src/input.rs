use crate::error::InputError;
use crate::models::UserInput;

pub const FIELD_COUNT: usize = 8;

pub const FIELD_LABELS: [&str; FIELD_COUNT] = [
    "Property Price ($)",
    "Down Payment ($)",
    "Interest Rate (%)",
    "Loan Term (Years)",
    "Gross Annual Income ($)",
    "Monthly Debts ($)",
    "Property Location (City, State)",
    "Work Location (for commute analysis)",
];

#[derive(Debug, Clone, PartialEq)]
pub struct FormFields {
    pub values: [String; FIELD_COUNT],
}

impl Default for FormFields {
    fn default() -> Self {
        Self {
            values: [
                "500000".to_string(),
                "100000".to_string(),
                "6.5".to_string(),
                "30".to_string(),
                "120000".to_string(),
                "500".to_string(),
                "Austin, TX".to_string(),
                "Downtown Austin, TX".to_string(),
            ],
        }
    }
}

impl FormFields {
    pub fn get(&self, index: usize) -> &str {
        &self.values[index]
    }

    pub fn set(&mut self, index: usize, value: impl Into<String>) {
        self.values[index] = value.into();
    }

    pub fn push_char(&mut self, index: usize, c: char) {
        self.values[index].push(c);
    }

    pub fn pop_char(&mut self, index: usize) {
        self.values[index].pop();
    }

    pub fn collect(&self) -> Result<UserInput, InputError> {
        Ok(UserInput {
            property_price: parse_amount(&self.values[0], "Property price")?,
            down_payment: parse_amount(&self.values[1], "Down payment")?,
            interest_rate: parse_amount(&self.values[2], "Interest rate")?,
            loan_term: parse_term(&self.values[3], "Loan term")?,
            annual_income: parse_amount(&self.values[4], "Annual income")?,
            monthly_debts: parse_amount(&self.values[5], "Monthly debts")?,
            property_location: parse_text(&self.values[6], "Property location")?,
            work_location: parse_text(&self.values[7], "Work location")?,
        })
    }
}

impl From<&UserInput> for FormFields {
    fn from(input: &UserInput) -> Self {
        Self {
            values: [
                input.property_price.to_string(),
                input.down_payment.to_string(),
                input.interest_rate.to_string(),
                input.loan_term.to_string(),
                input.annual_income.to_string(),
                input.monthly_debts.to_string(),
                input.property_location.clone(),
                input.work_location.clone(),
            ],
        }
    }
}

fn parse_amount(raw: &str, field: &'static str) -> Result<f64, InputError> {
    let value: f64 = raw
        .trim()
        .replace(',', "")
        .parse()
        .map_err(|_| InputError::NotANumber { field })?;
    if !value.is_finite() {
        return Err(InputError::NotANumber { field });
    }
    if value < 0.0 {
        return Err(InputError::Negative { field });
    }
    Ok(value)
}

fn parse_term(raw: &str, field: &'static str) -> Result<u32, InputError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('-') {
        return Err(InputError::Negative { field });
    }
    let years: u32 = trimmed
        .parse()
        .map_err(|_| InputError::NotANumber { field })?;
    if years == 0 {
        return Err(InputError::ZeroTerm { field });
    }
    Ok(years)
}

fn parse_text(raw: &str, field: &'static str) -> Result<String, InputError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InputError::Empty { field });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_collect_into_example_input() {
        let input = FormFields::default().collect().unwrap();
        assert_eq!(input.property_price, 500_000.0);
        assert_eq!(input.down_payment, 100_000.0);
        assert_eq!(input.interest_rate, 6.5);
        assert_eq!(input.loan_term, 30);
        assert_eq!(input.annual_income, 120_000.0);
        assert_eq!(input.monthly_debts, 500.0);
        assert_eq!(input.property_location, "Austin, TX");
        assert_eq!(input.work_location, "Downtown Austin, TX");
    }

    #[test]
    fn test_thousands_separators_are_accepted() {
        let mut form = FormFields::default();
        form.set(0, "1,250,000");
        assert_eq!(form.collect().unwrap().property_price, 1_250_000.0);
    }

    #[test]
    fn test_negative_amount_is_rejected() {
        let mut form = FormFields::default();
        form.set(5, "-10");
        assert_eq!(
            form.collect(),
            Err(InputError::Negative { field: "Monthly debts" })
        );
    }

    #[test]
    fn test_bad_term_is_rejected() {
        let mut form = FormFields::default();
        form.set(3, "0");
        assert_eq!(form.collect(), Err(InputError::ZeroTerm { field: "Loan term" }));
        form.set(3, "thirty");
        assert_eq!(form.collect(), Err(InputError::NotANumber { field: "Loan term" }));
    }

    #[test]
    fn test_blank_location_is_rejected() {
        let mut form = FormFields::default();
        form.set(7, "   ");
        assert_eq!(form.collect(), Err(InputError::Empty { field: "Work location" }));
    }

    #[test]
    fn test_round_trip_through_form() {
        let input = FormFields::default().collect().unwrap();
        let form = FormFields::from(&input);
        assert_eq!(form.collect().unwrap(), input);
    }

    #[test]
    fn test_editing_helpers() {
        let mut form = FormFields::default();
        form.pop_char(3);
        form.push_char(3, '5');
        assert_eq!(form.get(3), "35");
    }
}
