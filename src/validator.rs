use crate::models::{
    Affordability, AnalysisResult, BreakEven, Commute, Decision, LocationScore, MarketAnalysis,
    OwnershipCost, UserInput, Verdict,
};

#[derive(Debug, Clone, Copy)]
pub struct CompleteAnalysis<'a> {
    pub id: Option<&'a str>,
    pub decision: Decision,
    pub verdict: &'a Verdict,
    pub market_analysis: &'a MarketAnalysis,
    pub affordability: &'a Affordability,
    pub ownership_cost: &'a OwnershipCost,
    pub break_even: &'a BreakEven,
    pub commute: &'a Commute,
    pub location_score: &'a LocationScore,
    pub user_input: &'a UserInput,
}

pub fn complete(candidate: &AnalysisResult) -> Option<CompleteAnalysis<'_>> {
    let verdict = candidate.verdict.as_ref()?;
    Some(CompleteAnalysis {
        id: candidate.id.as_deref(),
        decision: verdict.decision?,
        verdict,
        market_analysis: candidate.market_analysis.as_ref()?,
        affordability: candidate.affordability.as_ref()?,
        ownership_cost: candidate.ownership_cost.as_ref()?,
        break_even: candidate.break_even.as_ref()?,
        commute: candidate.commute.as_ref()?,
        location_score: candidate.location_score.as_ref()?,
        user_input: candidate.user_input.as_ref()?,
    })
}

pub fn is_valid(candidate: &AnalysisResult) -> bool {
    complete(candidate).is_some()
}

pub fn missing_fields(candidate: &AnalysisResult) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if candidate.decision().is_none() {
        missing.push("verdict.decision");
    }
    if candidate.market_analysis.is_none() {
        missing.push("marketAnalysis");
    }
    if candidate.affordability.is_none() {
        missing.push("affordability");
    }
    if candidate.ownership_cost.is_none() {
        missing.push("ownershipCost");
    }
    if candidate.break_even.is_none() {
        missing.push("breakEven");
    }
    if candidate.commute.is_none() {
        missing.push("commute");
    }
    if candidate.location_score.is_none() {
        missing.push("locationScore");
    }
    if candidate.user_input.is_none() {
        missing.push("userInput");
    }
    missing
}
