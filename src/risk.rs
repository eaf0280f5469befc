use crate::models::{Category, RiskLevel, StudentAggregate, Tier};

pub const AT_RISK_AVERAGE: f64 = 3.0;
pub const MAJOR_RISK_AVERAGE: f64 = 2.5;
pub const MINOR_RISK_AVERAGE: f64 = 3.0;
pub const HIGH_RISK_AVERAGE: f64 = 4.0;
pub const MEDIUM_RISK_AVERAGE: f64 = 3.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskAssessment {
    pub average_risk: bool,
    pub tier_risk: bool,
    pub major_risk: bool,
    pub minor_risk: bool,
    pub level: RiskLevel,
}

impl RiskAssessment {
    pub fn is_at_risk(&self) -> bool {
        self.average_risk || self.tier_risk || self.major_risk || self.minor_risk
    }

    pub fn category_risk(&self, category: Category) -> bool {
        match category {
            Category::Major => self.major_risk,
            Category::Minor => self.minor_risk,
        }
    }
}

/// Major subjects are held to a stricter line than minor ones.
pub fn category_threshold(category: Category) -> f64 {
    match category {
        Category::Major => MAJOR_RISK_AVERAGE,
        Category::Minor => MINOR_RISK_AVERAGE,
    }
}

pub fn assess(student: &StudentAggregate, tier: Option<Tier>) -> RiskAssessment {
    let over = |category: Category| {
        student
            .category_average(category)
            .is_some_and(|average| average > category_threshold(category))
    };

    RiskAssessment {
        average_risk: student.average_score > AT_RISK_AVERAGE,
        tier_risk: tier == Some(Tier::C),
        major_risk: over(Category::Major),
        minor_risk: over(Category::Minor),
        level: risk_level(student.average_score),
    }
}

pub fn risk_level(average_score: f64) -> RiskLevel {
    if average_score >= HIGH_RISK_AVERAGE {
        RiskLevel::High
    } else if average_score >= MEDIUM_RISK_AVERAGE {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}
