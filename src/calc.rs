// `annual_rate` is a percentage. Non-positive principal or term gives 0.
pub fn monthly_payment(principal: f64, annual_rate: f64, years: f64) -> f64 {
    if principal <= 0.0 || annual_rate < 0.0 || years <= 0.0 {
        return 0.0;
    }

    let monthly_rate = annual_rate / 100.0 / 12.0;
    let payments = years * 12.0;

    if monthly_rate == 0.0 {
        return principal / payments;
    }

    let growth = (1.0 + monthly_rate).powf(payments);
    principal * (monthly_rate * growth) / (growth - 1.0)
}

pub fn debt_to_income(monthly_debts: f64, annual_income: f64) -> f64 {
    if annual_income <= 0.0 {
        return 0.0;
    }
    monthly_debts / (annual_income / 12.0) * 100.0
}

pub fn format_usd(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if rounded < 0.0 {
        format!("-${}", grouped)
    } else {
        format!("${}", grouped)
    }
}
