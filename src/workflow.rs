//! Document routing ("saraban") status workflow.
//!
//! The signing rules live here as a pure transition function so the state
//! machine can be tested without a database. Handlers apply the resulting
//! `SigningOutcome` inside a single transaction.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Draft,
    Proposed,
    Endorsed,
    Delegated,
    Distributed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Proposed => "proposed",
            Status::Endorsed => "endorsed",
            Status::Delegated => "delegated",
            Status::Distributed => "distributed",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "draft" => Some(Status::Draft),
            "proposed" => Some(Status::Proposed),
            "endorsed" => Some(Status::Endorsed),
            "delegated" => Some(Status::Delegated),
            "distributed" => Some(Status::Distributed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Director,
    Deputy,
    Teacher,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Director => "director",
            Role::Deputy => "deputy",
            Role::Teacher => "teacher",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "director" => Some(Role::Director),
            "deputy" => Some(Role::Deputy),
            "teacher" => Some(Role::Teacher),
            _ => None,
        }
    }
}

/// What the signing actor decided in the signing dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Sign without handing the document on.
    Keep,
    /// Hand responsibility to another staff member.
    Delegate,
}

/// Next status plus whether the delegate assignment survives the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningOutcome {
    pub status: Status,
    pub retains_assignee: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningRefusal {
    /// A proposed document may only be acted on by the director.
    NotDirector,
}

/// The transition table. Any combination outside it leaves the status as-is;
/// the only refusal is a non-director acting on a proposed document, which
/// must not mutate anything.
pub fn apply_signing(
    status: Status,
    actor: Role,
    decision: Decision,
) -> Result<SigningOutcome, SigningRefusal> {
    let is_director = actor == Role::Director;
    if status == Status::Proposed && !is_director {
        return Err(SigningRefusal::NotDirector);
    }
    let next = match (status, is_director, decision) {
        (Status::Proposed, true, Decision::Delegate) => Status::Delegated,
        (Status::Proposed, true, Decision::Keep) => Status::Endorsed,
        (Status::Delegated, false, Decision::Delegate) => Status::Delegated,
        (Status::Delegated, false, Decision::Keep) => Status::Distributed,
        (current, _, _) => current,
    };
    Ok(SigningOutcome {
        status: next,
        retains_assignee: decision == Decision::Delegate,
    })
}
