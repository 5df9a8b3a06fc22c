//! Witness policy expressions.
//!
//! ```text
//! policy  := expr ( "LogRequired" )?
//! expr    := term ( ("AND" | "OR") term )*
//! term    := "MinPercent(" int "," role ")"  |  "OutOf(" int "," role ")"
//! role    := "batch" | "system"
//! ```
//!
//! The grammar is flat: terms are evaluated left-to-right and an expression
//! mixing `AND` and `OR` at the same level is rejected.

mod cache;

pub use cache::PolicyCache;

use orb_types::{Witness, WitnessType};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("policy parse error: {0}")]
pub struct PolicyParseError(String);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Batch,
    System,
}

impl Role {
    fn matches(&self, witness_type: WitnessType) -> bool {
        matches!(
            (self, witness_type),
            (Role::Batch, WitnessType::Batch) | (Role::System, WitnessType::System)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Term {
    /// At least `⌈p × |role witnesses| / 100⌉` of the role's witnesses have
    /// submitted a non-empty proof.
    MinPercent(u64, Role),
    /// At least `k` of the role's witnesses have submitted a proof.
    OutOf(u64, Role),
}

/// A parsed witness policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    operator: Operator,
    terms: Vec<Term>,
    log_required: bool,
}

impl Policy {
    /// Parse a policy expression.
    pub fn parse(source: &str) -> Result<Self, PolicyParseError> {
        let mut tokens: Vec<&str> = source.split_whitespace().collect();
        let log_required = tokens.last() == Some(&"LogRequired");
        if log_required {
            tokens.pop();
        }
        if tokens.is_empty() {
            return Err(PolicyParseError("empty policy".to_string()));
        }

        let mut terms = vec![parse_term(tokens[0])?];
        let mut operator = None;
        let mut rest = &tokens[1..];
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(PolicyParseError(format!(
                    "dangling operator near {:?}",
                    rest[0]
                )));
            }
            let op = match rest[0] {
                "AND" => Operator::And,
                "OR" => Operator::Or,
                other => {
                    return Err(PolicyParseError(format!("unknown operator {other:?}")));
                }
            };
            match operator {
                None => operator = Some(op),
                Some(prev) if prev != op => {
                    return Err(PolicyParseError(
                        "mixing AND and OR without grouping is not supported".to_string(),
                    ));
                }
                Some(_) => {}
            }
            terms.push(parse_term(rest[1])?);
            rest = &rest[2..];
        }

        Ok(Policy {
            operator: operator.unwrap_or(Operator::And),
            terms,
            log_required,
        })
    }

    /// Evaluate the policy over a witness set. Pure: the decision is a
    /// function of the witnesses' recorded proofs only.
    pub fn evaluate(&self, witnesses: &[Witness]) -> bool {
        let satisfied = |term: &Term| {
            let (count_needed, role) = match term {
                Term::MinPercent(percent, role) => {
                    let total = witnesses
                        .iter()
                        .filter(|w| role.matches(w.witness_type))
                        .count() as u64;
                    ((percent * total).div_ceil(100), role)
                }
                Term::OutOf(k, role) => (*k, role),
            };
            let proved = witnesses
                .iter()
                .filter(|w| role.matches(w.witness_type))
                .filter(|w| w.has_proof())
                .filter(|w| !self.log_required || w.has_log)
                .count() as u64;
            proved >= count_needed
        };
        match self.operator {
            Operator::And => self.terms.iter().all(satisfied),
            Operator::Or => self.terms.iter().any(satisfied),
        }
    }

    pub fn log_required(&self) -> bool {
        self.log_required
    }
}

fn parse_term(token: &str) -> Result<Term, PolicyParseError> {
    let (name, args) = token
        .split_once('(')
        .ok_or_else(|| PolicyParseError(format!("unknown rule {token:?}")))?;
    let args = args
        .strip_suffix(')')
        .ok_or_else(|| PolicyParseError(format!("unterminated rule {token:?}")))?;
    let (count, role) = args
        .split_once(',')
        .ok_or_else(|| PolicyParseError(format!("rule {token:?} needs two arguments")))?;
    let count: u64 = count
        .trim()
        .parse()
        .map_err(|_| PolicyParseError(format!("malformed count in {token:?}")))?;
    let role = match role.trim() {
        "batch" => Role::Batch,
        "system" => Role::System,
        other => return Err(PolicyParseError(format!("unknown role {other:?}"))),
    };
    match name {
        "MinPercent" => {
            if count > 100 {
                return Err(PolicyParseError(format!(
                    "percentage out of range in {token:?}"
                )));
            }
            Ok(Term::MinPercent(count, role))
        }
        "OutOf" => Ok(Term::OutOf(count, role)),
        other => Err(PolicyParseError(format!("unknown rule {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_types::Proof;
    use quickcheck_macros::quickcheck;
    use url::Url;

    fn witness(witness_type: WitnessType, has_log: bool, proved: bool) -> Witness {
        let mut w = Witness::new(
            witness_type,
            Url::parse("https://witness.example.com/services/orb").unwrap(),
            has_log,
        );
        if proved {
            w.proof = Some(Proof {
                created: chrono::Utc::now(),
                domain: "https://witness.example.com".to_string(),
                verification_method: "did:web:witness.example.com#key".to_string(),
                proof_value: "z3MvG".to_string(),
                proof_type: "Ed25519Signature2020".to_string(),
            });
        }
        w
    }

    #[test]
    fn parses_the_reference_policies() {
        Policy::parse("MinPercent(100,batch) AND MinPercent(50,system)").unwrap();
        Policy::parse("OutOf(2,system)").unwrap();
        Policy::parse("MinPercent(100,batch) AND OutOf(1,system) LogRequired").unwrap();
    }

    #[test]
    fn rejects_mixed_operators() {
        let err =
            Policy::parse("OutOf(1,batch) AND OutOf(1,system) OR MinPercent(50,batch)").unwrap_err();
        assert!(err.to_string().contains("mixing"));
    }

    #[test]
    fn rejects_malformed_terms() {
        assert!(Policy::parse("").is_err());
        assert!(Policy::parse("Exactly(1,batch)").is_err());
        assert!(Policy::parse("OutOf(one,batch)").is_err());
        assert!(Policy::parse("OutOf(1,witness)").is_err());
        assert!(Policy::parse("MinPercent(140,batch)").is_err());
        assert!(Policy::parse("OutOf(1,batch) AND").is_err());
    }

    #[test]
    fn min_percent_uses_ceiling() {
        // 3 batch witnesses at 50% requires ⌈1.5⌉ = 2 proofs
        let policy = Policy::parse("MinPercent(50,batch)").unwrap();
        let mut set = vec![
            witness(WitnessType::Batch, false, true),
            witness(WitnessType::Batch, false, false),
            witness(WitnessType::Batch, false, false),
        ];
        assert!(!policy.evaluate(&set));
        set[1].proof = set[0].proof.clone();
        assert!(policy.evaluate(&set));
    }

    #[test]
    fn out_of_counts_role_proofs_only() {
        let policy = Policy::parse("OutOf(2,system)").unwrap();
        let set = vec![
            witness(WitnessType::System, false, true),
            witness(WitnessType::Batch, false, true),
            witness(WitnessType::Batch, false, true),
        ];
        assert!(!policy.evaluate(&set));
    }

    #[test]
    fn log_required_excludes_logless_witnesses() {
        let policy = Policy::parse("OutOf(1,system) LogRequired").unwrap();
        let set = vec![witness(WitnessType::System, false, true)];
        assert!(!policy.evaluate(&set));
        let set = vec![witness(WitnessType::System, true, true)];
        assert!(policy.evaluate(&set));
    }

    #[test]
    fn or_short_circuits_left_to_right() {
        let policy = Policy::parse("OutOf(1,batch) OR OutOf(1,system)").unwrap();
        let set = vec![
            witness(WitnessType::Batch, false, false),
            witness(WitnessType::System, false, true),
        ];
        assert!(policy.evaluate(&set));
    }

    #[quickcheck]
    fn adding_a_proof_is_monotone(shape: Vec<(bool, bool, bool)>) -> bool {
        let policy =
            Policy::parse("MinPercent(60,batch) AND OutOf(1,system) LogRequired").unwrap();
        let set: Vec<Witness> = shape
            .iter()
            .map(|&(is_batch, has_log, proved)| {
                let role = if is_batch {
                    WitnessType::Batch
                } else {
                    WitnessType::System
                };
                witness(role, has_log, proved)
            })
            .collect();
        if !policy.evaluate(&set) {
            // nothing to check; monotonicity concerns satisfying sets
            return true;
        }
        // flip every unproved witness to proved, one at a time
        (0..set.len()).all(|i| {
            if set[i].has_proof() {
                return true;
            }
            let mut extended = set.clone();
            extended[i] = witness(set[i].witness_type, set[i].has_log, true);
            policy.evaluate(&extended)
        })
    }
}
