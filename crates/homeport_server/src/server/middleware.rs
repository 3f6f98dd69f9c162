#![forbid(unsafe_code)]

use homeport_domain::Identity;
use thiserror::Error;

/// Checks a protected operation may require. Authentication is implicit:
/// every protected operation authenticates before anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
	Approved,
	Admin,
	SuperAdmin,
}

/// Authorization failure, mapped 1:1 onto an HTTP status.
///
/// The client-side gate is a UX convenience; these checks are the actual
/// security boundary and run regardless of what the client decided.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
	#[error("Unauthorized: please log in to access this resource")]
	Unauthenticated,

	#[error("{0}")]
	Forbidden(&'static str),
}

impl CapabilityError {
	pub fn http_status(&self) -> u16 {
		match self {
			CapabilityError::Unauthenticated => 401,
			CapabilityError::Forbidden(_) => 403,
		}
	}
}

/// A valid session must resolve to an enabled identity.
pub fn require_authenticated(identity: Option<&Identity>) -> Result<&Identity, CapabilityError> {
	match identity {
		Some(identity) if identity.enabled => Ok(identity),
		_ => Err(CapabilityError::Unauthenticated),
	}
}

pub fn require_approved(identity: &Identity) -> Result<(), CapabilityError> {
	if identity.approved {
		Ok(())
	} else {
		Err(CapabilityError::Forbidden(
			"Your account is pending approval by an administrator",
		))
	}
}

pub fn require_admin(identity: &Identity) -> Result<(), CapabilityError> {
	if identity.role.is_admin() {
		Ok(())
	} else {
		Err(CapabilityError::Forbidden("Forbidden: admin privileges required"))
	}
}

pub fn require_superadmin(identity: &Identity) -> Result<(), CapabilityError> {
	if identity.role.is_superadmin() {
		Ok(())
	} else {
		Err(CapabilityError::Forbidden("Forbidden: superadmin privileges required"))
	}
}

/// Evaluate required capabilities in the fixed order authenticated →
/// approved → role, short-circuiting at the first failure.
pub fn authorize<'a>(identity: Option<&'a Identity>, caps: &[Capability]) -> Result<&'a Identity, CapabilityError> {
	let identity = require_authenticated(identity)?;

	if caps.contains(&Capability::Approved) {
		require_approved(identity)?;
	}
	if caps.contains(&Capability::Admin) {
		require_admin(identity)?;
	}
	if caps.contains(&Capability::SuperAdmin) {
		require_superadmin(identity)?;
	}

	Ok(identity)
}

#[cfg(test)]
mod tests {
	use homeport_domain::{IdentityId, Role};

	use super::*;

	fn identity(role: Role, approved: bool, enabled: bool) -> Identity {
		Identity {
			id: IdentityId::new(1),
			display_name: "t".to_string(),
			role,
			approved,
			enabled,
		}
	}

	#[test]
	fn no_session_is_unauthenticated() {
		assert_eq!(require_authenticated(None).unwrap_err(), CapabilityError::Unauthenticated);
		assert_eq!(CapabilityError::Unauthenticated.http_status(), 401);
	}

	#[test]
	fn disabled_identity_is_unauthenticated() {
		let disabled = identity(Role::Admin, true, false);
		assert_eq!(
			require_authenticated(Some(&disabled)).unwrap_err(),
			CapabilityError::Unauthenticated
		);
	}

	#[test]
	fn unapproved_identity_is_forbidden_not_unauthenticated() {
		let unapproved = identity(Role::User, false, true);
		let err = authorize(Some(&unapproved), &[Capability::Approved]).unwrap_err();
		assert_eq!(err.http_status(), 403);
		assert!(err.to_string().contains("pending approval"));
	}

	#[test]
	fn role_ladder_for_admin_checks() {
		let user = identity(Role::User, true, true);
		let admin = identity(Role::Admin, true, true);
		let superadmin = identity(Role::SuperAdmin, true, true);

		assert!(require_admin(&user).is_err());
		assert!(require_admin(&admin).is_ok());
		assert!(require_admin(&superadmin).is_ok());

		assert!(require_superadmin(&admin).is_err());
		assert!(require_superadmin(&superadmin).is_ok());
	}

	#[test]
	fn authorize_short_circuits_in_fixed_order() {
		// Unauthenticated wins over everything else.
		let err = authorize(None, &[Capability::Approved, Capability::Admin]).unwrap_err();
		assert_eq!(err, CapabilityError::Unauthenticated);

		// Approved is checked before the role.
		let unapproved_admin = identity(Role::Admin, false, true);
		let err = authorize(Some(&unapproved_admin), &[Capability::Approved, Capability::Admin]).unwrap_err();
		assert!(err.to_string().contains("pending approval"));

		// All predicates must hold.
		let approved_user = identity(Role::User, true, true);
		let err = authorize(Some(&approved_user), &[Capability::Approved, Capability::Admin]).unwrap_err();
		assert!(err.to_string().contains("admin privileges"));

		let approved_admin = identity(Role::Admin, true, true);
		assert!(authorize(Some(&approved_admin), &[Capability::Approved, Capability::Admin]).is_ok());
	}
}
