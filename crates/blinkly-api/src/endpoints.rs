// REST endpoint paths.
//
// The login host is fixed; after login every call goes to the
// tier-specific host returned in the login response. Paths are
// relative so they can be joined onto either, or onto a test server.

use url::Url;

use crate::error::Error;

/// Host used for the initial login before the account tier is known.
pub const LOGIN_HOST: &str = "https://rest-prod.immedia-semi.com/";

/// URL builder rooted at one REST host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    /// Root the builder at `base`, normalizing to a trailing slash so
    /// relative joins append instead of replacing the last segment.
    pub fn new(mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { base }
    }

    /// The tier-specific production host, e.g. `https://rest-u011.immedia-semi.com/`.
    pub fn for_tier(tier: &str) -> Result<Self, Error> {
        Ok(Self::new(Url::parse(&format!(
            "https://rest-{tier}.immedia-semi.com/"
        ))?))
    }

    /// The pre-login host.
    pub fn login_host() -> Result<Self, Error> {
        Ok(Self::new(Url::parse(LOGIN_HOST)?))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn join(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base.join(path)?)
    }

    // ── Account ──────────────────────────────────────────────────────

    pub fn login(&self) -> Result<Url, Error> {
        self.join("api/v5/account/login")
    }

    pub fn verify_pin(&self, account_id: &str, client_id: &str) -> Result<Url, Error> {
        self.join(&format!(
            "api/v4/account/{account_id}/client/{client_id}/pin/verify"
        ))
    }

    pub fn logout(&self, account_id: &str, client_id: &str) -> Result<Url, Error> {
        self.join(&format!(
            "api/v4/account/{account_id}/client/{client_id}/logout"
        ))
    }

    pub fn homescreen(&self, account_id: &str) -> Result<Url, Error> {
        self.join(&format!("api/v3/accounts/{account_id}/homescreen"))
    }

    // ── Networks ─────────────────────────────────────────────────────

    pub fn network(&self, network_id: &str) -> Result<Url, Error> {
        self.join(&format!("network/{network_id}"))
    }

    pub fn network_arm(&self, account_id: &str, network_id: &str, armed: bool) -> Result<Url, Error> {
        let state = if armed { "arm" } else { "disarm" };
        self.join(&format!(
            "api/v1/accounts/{account_id}/networks/{network_id}/state/{state}"
        ))
    }

    // ── Sync-module cameras (legacy paths) ───────────────────────────

    pub fn camera_config(&self, network_id: &str, camera_id: &str) -> Result<Url, Error> {
        self.join(&format!("network/{network_id}/camera/{camera_id}/config"))
    }

    pub fn camera_motion(&self, network_id: &str, camera_id: &str, enabled: bool) -> Result<Url, Error> {
        let action = if enabled { "enable" } else { "disable" };
        self.join(&format!("network/{network_id}/camera/{camera_id}/{action}"))
    }

    pub fn camera_thumbnail(&self, network_id: &str, camera_id: &str) -> Result<Url, Error> {
        self.join(&format!("network/{network_id}/camera/{camera_id}/thumbnail"))
    }

    pub fn camera_clip(&self, network_id: &str, camera_id: &str) -> Result<Url, Error> {
        self.join(&format!("network/{network_id}/camera/{camera_id}/clip"))
    }

    // ── Account-scoped device paths ──────────────────────────────────

    /// `api/v1/accounts/{a}/networks/{n}/{collection}/{device}/{action}`,
    /// where `collection` is the product family (`cameras`, `owls`, `doorbells`).
    pub fn device_action(
        &self,
        account_id: &str,
        network_id: &str,
        collection: &str,
        device_id: &str,
        action: &str,
    ) -> Result<Url, Error> {
        self.join(&format!(
            "api/v1/accounts/{account_id}/networks/{network_id}/{collection}/{device_id}/{action}"
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tier_host_is_derived_from_tier() {
        let ep = Endpoints::for_tier("u011").unwrap();
        assert_eq!(ep.base().as_str(), "https://rest-u011.immedia-semi.com/");
        assert_eq!(
            ep.homescreen("1337").unwrap().as_str(),
            "https://rest-u011.immedia-semi.com/api/v3/accounts/1337/homescreen"
        );
    }

    #[test]
    fn base_with_path_keeps_prefix() {
        let ep = Endpoints::new(Url::parse("http://127.0.0.1:9000/mock").unwrap());
        assert_eq!(
            ep.network("7").unwrap().as_str(),
            "http://127.0.0.1:9000/mock/network/7"
        );
    }

    #[test]
    fn device_action_is_account_scoped() {
        let ep = Endpoints::login_host().unwrap();
        let url = ep.device_action("1", "1234", "owls", "2", "snooze").unwrap();
        assert_eq!(url.path(), "/api/v1/accounts/1/networks/1234/owls/2/snooze");
    }

    #[test]
    fn arm_and_disarm_paths() {
        let ep = Endpoints::login_host().unwrap();
        assert!(ep.network_arm("1", "9", true).unwrap().path().ends_with("/state/arm"));
        assert!(ep.network_arm("1", "9", false).unwrap().path().ends_with("/state/disarm"));
    }
}
