use safehome_shared::{
    ApiUser, ChildrenResponse, LinkRecord, LinksResponse, MeResponse, UserRole,
};
use serde::Serialize;

use crate::gateway::{Gateway, Payload, RequestError, RequestOptions};

/// Version of the consent text the client shows before asking for consent.
pub const CONSENT_TEXT_VERSION: &str = "v1";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkAction<'a> {
    link_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkRequest<'a> {
    child_email: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsentUpdate<'a> {
    consent_given: bool,
    consent_text_version: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RevokeParent<'a> {
    parent_id: &'a str,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct Signup<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
    role: UserRole,
}

/// Typed calls for the plain request/response endpoints.
#[derive(Clone)]
pub struct BackendApi {
    gateway: Gateway,
}

impl BackendApi {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Payload, RequestError> {
        self.gateway
            .post("/auth/login", &Credentials { email, password })
            .await
    }

    /// Create an account; the backend signs the new user in.
    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: UserRole,
    ) -> Result<Payload, RequestError> {
        let form = Signup {
            name,
            email,
            password,
            role,
        };
        self.gateway.post("/auth/signup", &form).await
    }

    pub async fn logout(&self) -> Result<(), RequestError> {
        self.gateway
            .request("/auth/logout", RequestOptions::post(None))
            .await?;
        Ok(())
    }

    pub async fn me(&self) -> Result<ApiUser, RequestError> {
        let me: MeResponse = self.gateway.get_json("/me").await?;
        Ok(me.user)
    }

    pub async fn children(&self) -> Result<ChildrenResponse, RequestError> {
        self.gateway.get_json("/children").await
    }

    /// Link requests waiting for the signed-in child.
    pub async fn pending_links(&self) -> Result<Vec<LinkRecord>, RequestError> {
        Ok(self.gateway.get_json::<LinksResponse>("/links/pending").await?.links)
    }

    /// Parents linked to the signed-in child.
    pub async fn child_links(&self) -> Result<Vec<LinkRecord>, RequestError> {
        Ok(self.gateway.get_json::<LinksResponse>("/links/child").await?.links)
    }

    /// Every link the signed-in parent has requested.
    pub async fn links(&self) -> Result<Vec<LinkRecord>, RequestError> {
        Ok(self.gateway.get_json::<LinksResponse>("/links").await?.links)
    }

    pub async fn accept_link(&self, link_id: &str) -> Result<(), RequestError> {
        self.gateway
            .post("/links/accept", &LinkAction { link_id })
            .await?;
        Ok(())
    }

    pub async fn decline_link(&self, link_id: &str) -> Result<(), RequestError> {
        self.gateway
            .post("/links/decline", &LinkAction { link_id })
            .await?;
        Ok(())
    }

    pub async fn request_link(&self, child_email: &str) -> Result<(), RequestError> {
        self.gateway
            .post("/links/request", &LinkRequest { child_email })
            .await?;
        Ok(())
    }

    pub async fn set_consent(&self, consent_given: bool) -> Result<(), RequestError> {
        let update = ConsentUpdate {
            consent_given,
            consent_text_version: CONSENT_TEXT_VERSION,
        };
        self.gateway.post("/me/consent", &update).await?;
        Ok(())
    }

    pub async fn revoke_parent(&self, parent_id: &str) -> Result<(), RequestError> {
        self.gateway
            .post("/me/revoke-parent", &RevokeParent { parent_id })
            .await?;
        Ok(())
    }

    pub async fn delete_account(&self) -> Result<(), RequestError> {
        self.gateway
            .request("/me/delete-account", RequestOptions::post(None))
            .await?;
        Ok(())
    }

    /// The export document exactly as the backend serialised it.
    pub async fn export_data(&self) -> Result<String, RequestError> {
        Ok(self
            .gateway
            .request("/me/export", RequestOptions::post(None))
            .await?
            .into_text())
    }
}
