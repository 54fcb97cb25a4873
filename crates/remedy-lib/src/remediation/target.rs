//! Which manifest an issue is remediated through

use crate::cluster::{ResourceKind, DEFAULT_NAMESPACE};
use crate::error::RemediationError;
use crate::models::DiagnosedIssue;
use std::fmt;

/// The resource whose manifest is fetched, rewritten and applied
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemediationTarget {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for RemediationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

fn two_segments(value: &str) -> Option<(&str, &str)> {
    let mut parts = value.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) if !a.is_empty() && !b.is_empty() => Some((a, b)),
        _ => None,
    }
}

/// Resolve the remediation target of an issue without touching the cluster.
///
/// An attributed issue is remediated through its owner: the namespace comes
/// from `name`, kind and name from `parent_object`.
pub fn resolve_target(issue: &DiagnosedIssue) -> Result<RemediationTarget, RemediationError> {
    if !issue.parent_object.is_empty() {
        let (namespace, _) = two_segments(&issue.name)
            .ok_or_else(|| RemediationError::InvalidName(issue.name.clone()))?;
        let (kind, name) = two_segments(&issue.parent_object)
            .ok_or_else(|| RemediationError::InvalidParentObject(issue.parent_object.clone()))?;
        let kind = kind
            .parse::<ResourceKind>()
            .map_err(|_| RemediationError::InvalidParentObject(issue.parent_object.clone()))?;
        return Ok(RemediationTarget {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }

    let kind = issue
        .kind
        .parse::<ResourceKind>()
        .map_err(|_| RemediationError::UnsupportedKind(issue.kind.clone()))?;

    let (namespace, name) = if issue.name.contains('/') {
        two_segments(&issue.name).ok_or_else(|| RemediationError::InvalidName(issue.name.clone()))?
    } else if issue.name.is_empty() {
        return Err(RemediationError::InvalidName(issue.name.clone()));
    } else {
        (DEFAULT_NAMESPACE, issue.name.as_str())
    };

    Ok(RemediationTarget {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributed_issue_targets_owner() {
        let issue = DiagnosedIssue::new("Pod", "ns1/pod-a").with_parent("Deployment/dep-a");
        let target = resolve_target(&issue).unwrap();
        assert_eq!(
            target,
            RemediationTarget {
                kind: ResourceKind::Deployment,
                namespace: "ns1".to_string(),
                name: "dep-a".to_string(),
            }
        );
    }

    #[test]
    fn test_unattributed_issue_targets_itself() {
        let target = resolve_target(&DiagnosedIssue::new("Pod", "shop/web-1")).unwrap();
        assert_eq!(target.kind, ResourceKind::Pod);
        assert_eq!(target.namespace, "shop");
        assert_eq!(target.name, "web-1");

        let target = resolve_target(&DiagnosedIssue::new("Pod", "web-1")).unwrap();
        assert_eq!(target.namespace, "default");
    }

    #[test]
    fn test_malformed_names_are_rejected() {
        let issue = DiagnosedIssue::new("Pod", "a/b/c").with_parent("Deployment/dep");
        assert!(matches!(
            resolve_target(&issue),
            Err(RemediationError::InvalidName(_))
        ));

        let issue = DiagnosedIssue::new("Pod", "pod-a").with_parent("Deployment/dep");
        assert!(matches!(
            resolve_target(&issue),
            Err(RemediationError::InvalidName(_))
        ));

        let issue = DiagnosedIssue::new("Pod", "ns1/pod-a").with_parent("dep-a");
        assert!(matches!(
            resolve_target(&issue),
            Err(RemediationError::InvalidParentObject(_))
        ));

        let issue = DiagnosedIssue::new("Pod", "ns1/pod-a").with_parent("Deployment/a/b");
        assert!(matches!(
            resolve_target(&issue),
            Err(RemediationError::InvalidParentObject(_))
        ));

        assert!(matches!(
            resolve_target(&DiagnosedIssue::new("Pod", "ns1/")),
            Err(RemediationError::InvalidName(_))
        ));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(matches!(
            resolve_target(&DiagnosedIssue::new("Ingress", "ns1/web")),
            Err(RemediationError::UnsupportedKind(_))
        ));
    }
}
