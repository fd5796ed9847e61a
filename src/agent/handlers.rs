//! The three expense-pipeline task handlers
//!
//! Deterministic implementations of the parse, analyze, and advise
//! stages. The orchestration core treats these as opaque collaborators;
//! they live here so the pipeline runs end to end without any external
//! service.

use crate::agent::TaskHandler;
use crate::error::OrchestrationError;
use crate::models::TaskRequest;
use crate::Result;
use serde_json::{json, Value};

/// Default date stamped on records when the text names no date
const DEFAULT_DATE: &str = "2024-12-01";

/// Category share above which the advisor flags overspending
const OVERSPEND_THRESHOLD_PCT: f64 = 30.0;

/// Share of total spend suggested as a monthly savings target
const SAVINGS_RATE: f64 = 0.15;

/// Static keyword tables — zero allocation
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("groceries", &["grocery", "groceries", "supermarket", "vegetables"]),
    ("rent", &["rent", "lease"]),
    ("transport", &["uber", "ola", "taxi", "cab", "bus", "train", "metro", "fuel", "petrol"]),
    ("dining", &["restaurant", "dinner", "lunch", "coffee", "pizza", "swiggy", "zomato", "takeout"]),
    ("entertainment", &["movie", "netflix", "spotify", "concert", "game"]),
    ("utilities", &["electricity", "water bill", "internet", "wifi", "phone bill", "utility"]),
    ("healthcare", &["doctor", "medicine", "pharmacy", "hospital"]),
    ("shopping", &["amazon", "clothes", "shoes", "shopping"]),
];

fn detect_category(line: &str) -> &'static str {
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|kw| line.contains(kw)) {
            return category;
        }
    }
    "miscellaneous"
}

fn detect_payment_method(line: &str) -> &'static str {
    if line.contains("upi") {
        "upi"
    } else if line.contains("cash") {
        "cash"
    } else if line.contains("card") || line.contains("credit") || line.contains("debit") {
        "card"
    } else {
        "unknown"
    }
}

fn extract_amount(line: &str) -> Option<f64> {
    for token in line.split_whitespace() {
        let cleaned: String = token
            .trim_start_matches('₹')
            .trim_start_matches('$')
            .trim_start_matches("rs.")
            .trim_start_matches("rs")
            .replace(',', "");
        if let Ok(amount) = cleaned.parse::<f64>() {
            if amount > 0.0 {
                return Some(amount);
            }
        }
    }
    None
}

fn extract_date(line: &str) -> &str {
    line.split_whitespace()
        .find(|token| {
            token.len() == 10
                && token.chars().enumerate().all(|(i, c)| match i {
                    4 | 7 => c == '-',
                    _ => c.is_ascii_digit(),
                })
        })
        .unwrap_or(DEFAULT_DATE)
}

fn as_f64(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("unknown")
}

//
// ================= Parser =================
//

/// Parses natural language expense descriptions into structured records
pub struct ExpenseParser;

#[async_trait::async_trait]
impl TaskHandler for ExpenseParser {
    fn agent_name(&self) -> &'static str {
        "expense_parser"
    }

    fn capability(&self) -> &'static str {
        "parse"
    }

    fn description(&self) -> &'static str {
        "Parses natural language expense descriptions into structured records \
         with categories, amounts, dates, and payment methods"
    }

    async fn handle(&self, request: &TaskRequest) -> Result<Value> {
        let text = request.content.as_str().ok_or_else(|| {
            OrchestrationError::InvalidTaskContent(
                "parser expects free text content".to_string(),
            )
        })?;

        let mut records = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let lowered = line.to_lowercase();
            // Lines without a recognizable amount are not expenses
            let Some(amount) = extract_amount(&lowered) else {
                continue;
            };

            records.push(json!({
                "date": extract_date(&lowered),
                "category": detect_category(&lowered),
                "description": line,
                "amount": amount,
                "payment_method": detect_payment_method(&lowered),
            }));
        }

        if records.is_empty() {
            return Err(OrchestrationError::InvalidTaskContent(
                "no expense records found in input text".to_string(),
            ));
        }

        Ok(Value::Array(records))
    }
}

//
// ================= Analyzer =================
//

/// Analyzes structured expense records into a monthly summary
pub struct ExpenseAnalyzer;

#[async_trait::async_trait]
impl TaskHandler for ExpenseAnalyzer {
    fn agent_name(&self) -> &'static str {
        "expense_analyzer"
    }

    fn capability(&self) -> &'static str {
        "analyze"
    }

    fn description(&self) -> &'static str {
        "Analyzes structured expense data and produces monthly summaries \
         with category breakdowns and spending patterns"
    }

    async fn handle(&self, request: &TaskRequest) -> Result<Value> {
        let records = request.content.as_array().ok_or_else(|| {
            OrchestrationError::InvalidTaskContent(
                "analyzer expects an array of expense records".to_string(),
            )
        })?;

        let mut total_spend = 0.0;
        let mut by_category: std::collections::BTreeMap<String, f64> = Default::default();
        let mut by_payment: std::collections::BTreeMap<String, f64> = Default::default();
        let mut counted = 0usize;

        for record in records {
            let Some(amount) = as_f64(record, "amount") else {
                continue;
            };
            total_spend += amount;
            counted += 1;
            *by_category
                .entry(as_str(record, "category").to_string())
                .or_default() += amount;
            *by_payment
                .entry(as_str(record, "payment_method").to_string())
                .or_default() += amount;
        }

        if counted == 0 {
            return Err(OrchestrationError::InvalidTaskContent(
                "no records with a numeric amount".to_string(),
            ));
        }

        // Largest categories first
        let mut breakdown: Vec<(String, f64)> = by_category.into_iter().collect();
        breakdown.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let category_breakdown: Vec<Value> = breakdown
            .iter()
            .map(|(category, amount)| {
                json!({
                    "category": category,
                    "amount": amount,
                    "share_pct": (amount / total_spend * 100.0 * 100.0).round() / 100.0,
                })
            })
            .collect();

        let mut top: Vec<&Value> = records
            .iter()
            .filter(|r| as_f64(r, "amount").is_some())
            .collect();
        top.sort_by(|a, b| {
            as_f64(b, "amount")
                .partial_cmp(&as_f64(a, "amount"))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let top_expenses: Vec<Value> = top
            .into_iter()
            .take(3)
            .map(|r| {
                json!({
                    "description": as_str(r, "description"),
                    "category": as_str(r, "category"),
                    "amount": as_f64(r, "amount"),
                })
            })
            .collect();

        Ok(json!({
            "total_spend": total_spend,
            "expense_count": counted,
            "average_expense": total_spend / counted as f64,
            "category_breakdown": category_breakdown,
            "top_expenses": top_expenses,
            "payment_methods": by_payment,
        }))
    }
}

//
// ================= Advisor =================
//

/// Derives budget and savings recommendations from an expense analysis
pub struct FinancialAdvisor;

#[async_trait::async_trait]
impl TaskHandler for FinancialAdvisor {
    fn agent_name(&self) -> &'static str {
        "financial_advisor"
    }

    fn capability(&self) -> &'static str {
        "advise"
    }

    fn description(&self) -> &'static str {
        "Provides personalized budget optimization, savings, and investment \
         recommendations based on an expense analysis"
    }

    async fn handle(&self, request: &TaskRequest) -> Result<Value> {
        let analysis = &request.content;
        let total_spend = as_f64(analysis, "total_spend").ok_or_else(|| {
            OrchestrationError::InvalidTaskContent(
                "advisor expects an analysis with total_spend".to_string(),
            )
        })?;
        let breakdown = analysis
            .get("category_breakdown")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                OrchestrationError::InvalidTaskContent(
                    "advisor expects an analysis with category_breakdown".to_string(),
                )
            })?;

        let mut recommendations = Vec::new();
        let mut health_score: i64 = 8;

        for entry in breakdown {
            let category = as_str(entry, "category");
            let share = as_f64(entry, "share_pct").unwrap_or(0.0);
            let amount = as_f64(entry, "amount").unwrap_or(0.0);

            // Rent is a fixed commitment; everything else over the
            // threshold is a trim candidate.
            if share > OVERSPEND_THRESHOLD_PCT && category != "rent" {
                health_score -= 1;
                recommendations.push(format!(
                    "{} is {:.1}% of your spending ({:.0}); target a 20% cut to free up {:.0} per month",
                    category,
                    share,
                    amount,
                    amount * 0.2
                ));
            }
        }

        if let Some(top_share) = breakdown.first().and_then(|e| as_f64(e, "share_pct")) {
            if top_share > 50.0 {
                health_score -= 1;
            }
        }
        let health_score = health_score.clamp(1, 10);

        let savings_estimate = (total_spend * SAVINGS_RATE).round();
        let emergency_fund = (total_spend * 3.0).round();

        if recommendations.is_empty() {
            recommendations
                .push("Spending is well distributed across categories; hold the line".to_string());
        }
        recommendations.push(format!(
            "Set aside {:.0} per month ({}% of current spending) into savings",
            savings_estimate,
            (SAVINGS_RATE * 100.0) as i64
        ));

        let action_plan = vec![
            format!(
                "Build an emergency fund of {:.0} (3 months of expenses)",
                emergency_fund
            ),
            format!(
                "Automate a {:.0} monthly transfer to a savings account",
                savings_estimate
            ),
            "Review the top three expenses and decide which are recurring".to_string(),
            "Start a monthly SIP once the emergency fund covers one month".to_string(),
        ];

        let advisory = format!(
            "You spent {:.0} this month across {} categories. Financial health: {}/10. {}",
            total_spend,
            breakdown.len(),
            health_score,
            recommendations.join(". ")
        );

        Ok(json!({
            "health_score": health_score,
            "savings_estimate": savings_estimate,
            "recommendations": recommendations,
            "action_plan": action_plan,
            "advisory": advisory,
        }))
    }
}
