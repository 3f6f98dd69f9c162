use homeport_domain::Identity;

/// Result of the identity lookup feeding the gate.
///
/// A lookup error is its own state so the gate can fail closed instead of
/// rendering on stale data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityLoad {
	Loading,
	Loaded(Option<Identity>),
	Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectTarget {
	Login,
	PendingApproval,
}

impl RedirectTarget {
	pub const fn path(self) -> &'static str {
		match self {
			RedirectTarget::Login => "/auth",
			RedirectTarget::PendingApproval => "/pending",
		}
	}
}

/// Per-navigation decision. Derived, never stored: recompute on every
/// navigation so a login or approval elsewhere takes effect immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
	Loading,
	Redirect(RedirectTarget),
	Render,
}

/// Decide whether a protected view may render.
///
/// Lookup failures and disabled accounts resolve to the login redirect;
/// the gate fails closed, never open.
pub fn evaluate(load: &IdentityLoad) -> GateDecision {
	match load {
		IdentityLoad::Loading => GateDecision::Loading,
		IdentityLoad::Failed => GateDecision::Redirect(RedirectTarget::Login),
		IdentityLoad::Loaded(None) => GateDecision::Redirect(RedirectTarget::Login),
		IdentityLoad::Loaded(Some(identity)) => {
			if !identity.enabled {
				GateDecision::Redirect(RedirectTarget::Login)
			} else if !identity.approved {
				GateDecision::Redirect(RedirectTarget::PendingApproval)
			} else {
				GateDecision::Render
			}
		}
	}
}

/// Whether a client route sits behind the gate. `/auth` and `/pending`
/// must stay reachable for the redirects to terminate.
pub fn route_is_guarded(path: &str) -> bool {
	!matches!(path, "/auth" | "/pending")
}

/// Gate decision for one navigation to `path`.
pub fn decide_for_route(path: &str, load: &IdentityLoad) -> GateDecision {
	if !route_is_guarded(path) {
		return GateDecision::Render;
	}
	evaluate(load)
}
