use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ai::CompletionService;
use crate::error::AnalysisError;
use crate::models::{
    Affordability, AnalysisResult, BreakEven, Commute, Decision, GroundingChunk, LocationScore,
    MarketAnalysis, OwnershipCost, Trend, UserInput, Verdict,
};
use crate::validator;

pub const DEFAULT_SIMULATED_DELAY: Duration = Duration::from_millis(1500);

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("fenced block pattern is valid")
});

#[derive(Debug, Clone)]
pub struct AnalysisResponse {
    pub analysis: AnalysisResult,
    pub citations: Vec<GroundingChunk>,
}

pub enum AnalysisGateway {
    Live(Box<dyn CompletionService>),
    Simulated { delay: Duration },
}

impl AnalysisGateway {
    pub fn is_live(&self) -> bool {
        matches!(self, AnalysisGateway::Live(_))
    }

    pub fn get_analysis(&self, input: &UserInput) -> Result<AnalysisResponse, AnalysisError> {
        match self {
            AnalysisGateway::Live(service) => {
                info!(model = service.model_name(), location = %input.property_location, "requesting analysis");
                let completion = service.complete(&build_prompt(input))?;
                let analysis = parse_analysis(&completion.text, input)?;
                Ok(AnalysisResponse {
                    analysis,
                    citations: completion.citations,
                })
            }
            AnalysisGateway::Simulated { delay } => {
                debug!(?delay, "simulated analysis");
                thread::sleep(*delay);
                Ok(AnalysisResponse {
                    analysis: canned_analysis(input.clone()),
                    citations: Vec::new(),
                })
            }
        }
    }
}

pub fn build_prompt(input: &UserInput) -> String {
    format!(
        "Analyze the following real estate investment scenario and provide a detailed breakdown in JSON format.\n\
        The user is considering buying a property and wants to know if it's a good financial decision. \
        Use Google Search to find recent, relevant data for your analysis.\n\n\
        User's Financial Profile:\n\
        - Annual Income: ${annual_income}\n\
        - Monthly Debts (excluding new mortgage): ${monthly_debts}\n\n\
        Property Details:\n\
        - Price: ${price}\n\
        - Location: {property_location}\n\
        - Down Payment: ${down_payment}\n\n\
        Loan Details:\n\
        - Interest Rate: {rate}%\n\
        - Loan Term: {term} years\n\n\
        Other Considerations:\n\
        - User's Work Location: {work_location}\n\n\
        Respond with a single JSON object with exactly this shape:\n\
        {shape}\n\n\
        All numbers must be plain JSON numbers. Do not include any text outside the JSON object.",
        annual_income = input.annual_income,
        monthly_debts = input.monthly_debts,
        price = input.property_price,
        property_location = input.property_location,
        down_payment = input.down_payment,
        rate = input.interest_rate,
        term = input.loan_term,
        work_location = input.work_location,
        shape = RESPONSE_SHAPE,
    )
}

const RESPONSE_SHAPE: &str = r#"{
  "verdict": { "decision": "good" | "borderline" | "bad", "summary": string, "pros": [string], "cons": [string] },
  "marketAnalysis": { "trend": "up" | "down" | "stable", "sentiment": number (0-100), "narrative": string },
  "affordability": { "monthlyPayment": number, "dtiRatio": number (percent), "affordabilityIndex": number (0-100), "narrative": string },
  "ownershipCost": { "principalAndInterest": number, "propertyTax": number, "homeInsurance": number, "maintenance": number, "totalMonthlyCost": number },
  "breakEven": { "years": number, "narrative": string },
  "commute": { "time": number (minutes), "distance": number (miles), "narrative": string },
  "locationScore": { "schools": number (0-10), "crime": number (0-10), "amenities": number (0-10), "overall": number (0-10), "narrative": string }
}"#;

pub fn extract_json(text: &str) -> Result<Value, AnalysisError> {
    if let Some(caps) = FENCED_BLOCK.captures(text) {
        let block = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        match serde_json::from_str::<Value>(block) {
            Ok(value) => return Ok(value),
            Err(e) => debug!(error = %e, "fenced block is not JSON, trying whole response"),
        }
    }

    serde_json::from_str::<Value>(text.trim()).map_err(|e| {
        warn!(error = %e, "model response is not JSON");
        AnalysisError::Format(format!("response could not be parsed as JSON ({})", e))
    })
}

pub fn parse_analysis(text: &str, input: &UserInput) -> Result<AnalysisResult, AnalysisError> {
    let mut value = extract_json(text)?;

    let object = value
        .as_object_mut()
        .ok_or_else(|| AnalysisError::Format("response is not a JSON object".to_string()))?;

    // The model is not trusted to echo the request back.
    object.insert(
        "userInput".to_string(),
        serde_json::to_value(input).map_err(|e| AnalysisError::Format(e.to_string()))?,
    );
    object.remove("id");
    object.remove("savedAt");

    let analysis: AnalysisResult = serde_json::from_value(value)
        .map_err(|e| AnalysisError::Format(format!("unexpected structure ({})", e)))?;

    let missing = validator::missing_fields(&analysis);
    if !missing.is_empty() {
        return Err(AnalysisError::Format(format!(
            "missing fields: {}",
            missing.join(", ")
        )));
    }

    Ok(analysis)
}

pub fn canned_analysis(input: UserInput) -> AnalysisResult {
    AnalysisResult {
        id: None,
        saved_at: None,
        verdict: Some(Verdict {
            decision: Some(Decision::Borderline),
            summary: "This is a simulated analysis. No AI service is configured.".to_string(),
            pros: vec!["App is running in simulation mode.".to_string()],
            cons: vec!["Live AI data is unavailable.".to_string()],
        }),
        market_analysis: Some(MarketAnalysis {
            trend: Trend::Stable,
            sentiment: 50.0,
            narrative: "Market data is simulated.".to_string(),
        }),
        affordability: Some(Affordability {
            monthly_payment: 2500.0,
            dti_ratio: 35.0,
            affordability_index: 65.0,
            narrative: "Affordability is simulated.".to_string(),
        }),
        ownership_cost: Some(OwnershipCost {
            principal_and_interest: 2000.0,
            property_tax: 300.0,
            home_insurance: 100.0,
            maintenance: 100.0,
            total_monthly_cost: 2500.0,
        }),
        break_even: Some(BreakEven {
            years: 5.5,
            narrative: "Break-even point is simulated.".to_string(),
        }),
        commute: Some(Commute {
            time: 25.0,
            distance: 10.0,
            narrative: "Commute data is simulated.".to_string(),
        }),
        location_score: Some(LocationScore {
            schools: 7.0,
            crime: 8.0,
            amenities: 9.0,
            overall: 8.0,
            narrative: "Location scores are simulated.".to_string(),
        }),
        user_input: Some(input),
    }
}
