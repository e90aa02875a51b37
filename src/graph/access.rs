//! Access-control extension point.
//!
//! Every handle operation asks the graph's `AccessPolicy` before touching data.
//! The default policy allows everything.

use std::fmt;

use super::instructions::InstructionSet;

/// The operation being attempted.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Set,
    Delete,
    Apply,
    /// Key enumeration and snapshots.
    Inspect,
    /// Changing a node's instructions.
    Configure,
}

impl Operation {
    /// Returns the operation name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Apply => "apply",
            Self::Inspect => "inspect",
            Self::Configure => "configure",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the policy is asked to approve.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    #[allow(missing_docs)]
    pub operation: Operation,
    /// Namespace of the node the operation runs on.
    pub namespace: &'a str,
    /// Key within the node, if any.
    pub key: Option<&'a str>,
    /// Resolved instructions of the node, including its `access` label.
    pub instructions: &'a InstructionSet,
}

impl AccessRequest<'_> {
    /// The node's `access` label, if one was set or inherited.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.instructions.access.as_deref()
    }
}

/// Decides whether an operation may proceed.
pub trait AccessPolicy: Send + Sync {
    /// Returns false to reject the operation with `UnauthorizedAccess`.
    fn check(&self, request: &AccessRequest<'_>) -> bool;
}

/// Allows every operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn check(&self, _request: &AccessRequest<'_>) -> bool {
        true
    }
}

impl<F> AccessPolicy for F
where
    F: Fn(&AccessRequest<'_>) -> bool + Send + Sync,
{
    fn check(&self, request: &AccessRequest<'_>) -> bool {
        self(request)
    }
}

impl fmt::Debug for dyn AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessPolicy")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_act_as_policies() {
        let deny_private = |req: &AccessRequest<'_>| req.label() != Some("private");
        let mut instructions = InstructionSet::default();

        let request = AccessRequest {
            operation: Operation::Get,
            namespace: "$.a",
            key: Some("b"),
            instructions: &instructions,
        };
        assert!(deny_private.check(&request));
        assert!(AllowAll.check(&request));

        instructions.access = Some("private".to_string());
        let request = AccessRequest {
            operation: Operation::Set,
            namespace: "$.a",
            key: Some("b"),
            instructions: &instructions,
        };
        assert!(!deny_private.check(&request));
    }
}
