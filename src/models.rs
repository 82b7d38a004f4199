use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInput {
    pub property_price: f64,
    pub down_payment: f64,
    pub interest_rate: f64, // percent, e.g. 6.5
    pub loan_term: u32,     // years
    pub annual_income: f64,
    pub monthly_debts: f64,
    pub property_location: String,
    pub work_location: String,
}

impl UserInput {
    pub fn loan_amount(&self) -> f64 {
        (self.property_price - self.down_payment).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Good,
    Borderline,
    Bad,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Good => write!(f, "good"),
            Decision::Borderline => write!(f, "borderline"),
            Decision::Bad => write!(f, "bad"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Up => write!(f, "up"),
            Trend::Down => write!(f, "down"),
            Trend::Stable => write!(f, "stable"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Verdict {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    pub summary: String,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAnalysis {
    pub trend: Trend,
    #[serde(default)]
    pub sentiment: f64, // 0-100
    #[serde(default)]
    pub narrative: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Affordability {
    pub monthly_payment: f64,
    pub dti_ratio: f64,
    pub affordability_index: f64, // 0-100
    pub narrative: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OwnershipCost {
    pub principal_and_interest: f64,
    pub property_tax: f64,
    pub home_insurance: f64,
    pub maintenance: f64,
    pub total_monthly_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakEven {
    pub years: f64,
    pub narrative: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Commute {
    pub time: f64,     // minutes
    pub distance: f64, // miles
    pub narrative: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationScore {
    pub schools: f64, // each 0-10
    pub crime: f64,
    pub amenities: f64,
    pub overall: f64,
    pub narrative: String,
}

// Stored records are not trusted: a section that fails to decode is left
// empty and `validator::complete` decides whether the record may be rendered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisResult {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub market_analysis: Option<MarketAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub affordability: Option<Affordability>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub ownership_cost: Option<OwnershipCost>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub break_even: Option<BreakEven>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub commute: Option<Commute>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub location_score: Option<LocationScore>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub user_input: Option<UserInput>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

impl AnalysisResult {
    pub fn without_identity(&self) -> Self {
        Self {
            id: None,
            saved_at: None,
            ..self.clone()
        }
    }

    pub fn decision(&self) -> Option<Decision> {
        self.verdict.as_ref().and_then(|v| v.decision)
    }

    pub fn property_location(&self) -> &str {
        self.user_input
            .as_ref()
            .map(|input| input.property_location.as_str())
            .unwrap_or("(unknown location)")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<WebSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub email: Option<String>,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_result_uses_camel_case_keys() {
        let result = AnalysisResult {
            ownership_cost: Some(OwnershipCost {
                total_monthly_cost: 2500.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["ownershipCost"]["totalMonthlyCost"], 2500.0);
        assert!(json.get("id").is_none());
        assert!(json.get("verdict").is_none());
    }

    #[test]
    fn test_partial_record_deserializes_with_missing_sections() {
        let json = r#"{"id":"abc","verdict":{"summary":"no decision"}}"#;
        let result: AnalysisResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.id.as_deref(), Some("abc"));
        assert!(result.decision().is_none());
        assert!(result.market_analysis.is_none());
        assert_eq!(result.property_location(), "(unknown location)");
    }

    #[test]
    fn test_mistyped_sections_decode_as_missing() {
        let json = r#"{
            "id": "sim_old",
            "verdict": {"decision": "maybe", "summary": "?"},
            "marketAnalysis": {"sentiment": 50},
            "affordability": {"monthlyPayment": "a lot"},
            "breakEven": {"years": 7, "narrative": "fine"}
        }"#;
        let result: AnalysisResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.id.as_deref(), Some("sim_old"));
        assert!(result.verdict.is_none());
        assert!(result.market_analysis.is_none());
        assert!(result.affordability.is_none());
        assert_eq!(result.break_even.unwrap().years, 7.0);
    }

    #[test]
    fn test_non_object_record_is_rejected() {
        assert!(serde_json::from_str::<AnalysisResult>("42").is_err());
    }

    #[test]
    fn test_without_identity_strips_id_and_timestamp() {
        let result = AnalysisResult {
            id: Some("x".to_string()),
            saved_at: Some(Utc::now()),
            ..Default::default()
        };
        let stripped = result.without_identity();
        assert!(stripped.id.is_none());
        assert!(stripped.saved_at.is_none());
    }
}
