//! Manager-alpha strategy: picking the person matters more than timing.
//!
//! Does not originate directional views; it nudges confidence toward funds
//! run by proven managers (grade A/B) and away from weak ones (grade D).
//!
//! Requires: `market.manager_scores`.

use serde_json::json;

use crate::models::{FundBook, ManagerGrade, MarketData, Signal, SignalType};

use super::Strategy;

pub struct ManagerAlpha;

impl Strategy for ManagerAlpha {
    fn name(&self) -> &'static str {
        "manager_alpha"
    }

    fn default_weight(&self) -> f64 {
        0.10
    }

    fn generate(&self, market: &MarketData, funds: &FundBook) -> Vec<Signal> {
        if market.manager_scores.is_empty() {
            return Vec::new();
        }

        let mut signals = Vec::new();
        for fund_code in funds.keys() {
            let Some(eval) = market.manager_scores.get(fund_code) else {
                continue;
            };
            let reason_text = if eval.reasons.is_empty() {
                format!("manager score {:.0}", eval.score)
            } else {
                eval.reasons.iter().take(3).cloned().collect::<Vec<_>>().join("; ")
            };

            let call = match eval.grade {
                ManagerGrade::A => Some((
                    SignalType::Buy,
                    0.40,
                    30,
                    format!("manager grade A ({:.0}): {reason_text}", eval.score),
                )),
                ManagerGrade::B => Some((
                    SignalType::Buy,
                    0.25,
                    20,
                    format!("manager grade B ({:.0}): {reason_text}", eval.score),
                )),
                ManagerGrade::D => Some((
                    SignalType::Sell,
                    0.30,
                    25,
                    format!("manager grade D ({:.0}), ability in doubt: {reason_text}", eval.score),
                )),
                ManagerGrade::C => None,
            };

            if let Some((signal_type, confidence, priority, reason)) = call {
                signals.push(
                    Signal::new(fund_code.clone(), signal_type, confidence, reason, self.name())
                        .with_priority(priority)
                        .with_meta("manager_score", json!(eval.score))
                        .with_meta("grade", json!(eval.grade.as_str())),
                );
            }
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FundCategory, FundHistory, ManagerEvaluation};

    fn book(codes: &[&str]) -> FundBook {
        codes
            .iter()
            .map(|c| {
                (
                    c.to_string(),
                    FundHistory {
                        category: FundCategory::Equity,
                        nav_history: Vec::new(),
                    },
                )
            })
            .collect()
    }

    fn eval(code: &str, grade: ManagerGrade, score: f64) -> ManagerEvaluation {
        ManagerEvaluation {
            fund_code: code.to_string(),
            score,
            grade,
            annualized_return: None,
            max_drawdown: None,
            sharpe_ratio: None,
            reasons: vec![],
        }
    }

    #[test]
    fn grades_map_to_signals() {
        let mut market = MarketData::default();
        market.manager_scores.insert("a".into(), eval("a", ManagerGrade::A, 85.0));
        market.manager_scores.insert("b".into(), eval("b", ManagerGrade::B, 70.0));
        market.manager_scores.insert("c".into(), eval("c", ManagerGrade::C, 55.0));
        market.manager_scores.insert("d".into(), eval("d", ManagerGrade::D, 40.0));

        let signals = ManagerAlpha.generate(&market, &book(&["a", "b", "c", "d"]));
        assert_eq!(signals.len(), 3);
        let a = signals.iter().find(|s| s.fund_code == "a").unwrap();
        assert!(a.is_buy());
        assert_eq!(a.confidence, 0.40);
        let d = signals.iter().find(|s| s.fund_code == "d").unwrap();
        assert!(d.is_sell());
        assert!(!signals.iter().any(|s| s.fund_code == "c"));
    }

    #[test]
    fn no_scores_no_signals() {
        let market = MarketData::default();
        assert!(ManagerAlpha.generate(&market, &book(&["a"])).is_empty());
    }
}
