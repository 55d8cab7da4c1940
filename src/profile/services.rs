use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::dto::{UpdateProfileRequest, UserDetails};
use crate::{
    auth::services::normalize_name,
    db::{CredentialStore, ProfileUpdate, User},
    error::{AppError, AppResult},
};

pub async fn details(store: &dyn CredentialStore, user_id: Uuid) -> AppResult<UserDetails> {
    let user = store
        .find_user_by_id(user_id)
        .await
        .map_err(AppError::upstream("Internal server error"))?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    let auth_type = store
        .auth_type(user_id)
        .await
        .map_err(AppError::upstream("Internal server error"))?;
    Ok(UserDetails::new(user, auth_type))
}

fn validate(req: UpdateProfileRequest) -> AppResult<ProfileUpdate> {
    let name = normalize_name(req.name.as_deref())?
        .ok_or_else(|| AppError::Validation("Name is required".into()))?;

    let avatar_url = match req.avatar_url.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => {
            if Url::parse(raw).is_err() {
                return Err(AppError::Validation("Invalid avatar URL format".into()));
            }
            Some(raw.to_string())
        }
    };

    Ok(ProfileUpdate { name, avatar_url })
}

/// Updates name and avatar of the session's own user. Role is not touched.
pub async fn update_profile(
    store: &dyn CredentialStore,
    user_id: Uuid,
    req: UpdateProfileRequest,
) -> AppResult<User> {
    let update = validate(req).inspect_err(|e| warn!(%user_id, error = %e, "profile update rejected"))?;

    let user = store
        .update_profile(user_id, &update)
        .await
        .map_err(AppError::upstream("Failed to update profile"))?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    info!(%user_id, "profile updated");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{memory::MemoryStore, AuthType, NewUser, ProviderLink, Role};

    fn req(name: Option<&str>, avatar: Option<&str>) -> UpdateProfileRequest {
        UpdateProfileRequest {
            name: name.map(Into::into),
            avatar_url: avatar.map(Into::into),
        }
    }

    async fn seed(store: &MemoryStore) -> User {
        store
            .insert_user(NewUser {
                email: "alice@x.com".into(),
                password_hash: Some("$argon2id$fake".into()),
                name: Some("Alice".into()),
                avatar_url: Some("https://img.example/old.png".into()),
            })
            .await
            .unwrap()
    }

    fn message(err: AppError) -> String {
        match err {
            AppError::Validation(m) => m,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn name_rules() {
        assert_eq!(message(validate(req(None, None)).unwrap_err()), "Name is required");
        assert_eq!(message(validate(req(Some(""), None)).unwrap_err()), "Name is required");
        assert_eq!(message(validate(req(Some("   "), None)).unwrap_err()), "Name is required");
        assert_eq!(
            message(validate(req(Some(&"n".repeat(101)), None)).unwrap_err()),
            "Name must be less than 100 characters"
        );
        assert_eq!(validate(req(Some("  Al  "), None)).unwrap().name, "Al");
        assert!(validate(req(Some(&"n".repeat(100)), None)).is_ok());
    }

    #[test]
    fn avatar_rules() {
        assert_eq!(
            message(validate(req(Some("Al"), Some("not-a-url"))).unwrap_err()),
            "Invalid avatar URL format"
        );
        assert_eq!(validate(req(Some("Al"), Some(""))).unwrap().avatar_url, None);
        assert_eq!(validate(req(Some("Al"), Some("  "))).unwrap().avatar_url, None);
        assert_eq!(
            validate(req(Some("Al"), Some(" https://img.example/a.png ")))
                .unwrap()
                .avatar_url
                .as_deref(),
            Some("https://img.example/a.png")
        );
    }

    #[tokio::test]
    async fn update_persists_and_clears_avatar() {
        let store = MemoryStore::new();
        let alice = seed(&store).await;
        let updated = update_profile(&store, alice.id, req(Some(" Alice B "), Some("")))
            .await
            .unwrap();
        assert_eq!(updated.name.as_deref(), Some("Alice B"));
        assert_eq!(updated.avatar_url, None);
        assert_eq!(updated.role, Role::User);

        let stored = store.find_user_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.avatar_url, None);
    }

    #[tokio::test]
    async fn rejected_update_leaves_row_alone() {
        let store = MemoryStore::new();
        let alice = seed(&store).await;
        let err = update_profile(&store, alice.id, req(Some("New"), Some("not-a-url")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let stored = store.find_user_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("Alice"));
        assert_eq!(stored.avatar_url.as_deref(), Some("https://img.example/old.png"));
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let store = MemoryStore::new();
        let err = update_profile(&store, Uuid::new_v4(), req(Some("Al"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(matches!(
            details(&store, Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn details_report_auth_type() {
        let store = MemoryStore::new();
        let alice = seed(&store).await;
        let d = details(&store, alice.id).await.unwrap();
        assert_eq!(d.auth_type, AuthType::EmailPassword);
        assert_eq!(d.email, "alice@x.com");

        let (linked, _, created) = store
            .link_oauth_user(
                NewUser {
                    email: "alice@x.com".into(),
                    ..Default::default()
                },
                ProviderLink {
                    provider: "github".into(),
                    provider_id: "7".into(),
                    access_token: None,
                    refresh_token: None,
                    token_expiry: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(linked.id, alice.id);
        assert!(!created);
        let d = details(&store, alice.id).await.unwrap();
        assert_eq!(d.auth_type, AuthType::OAuth);
    }
}
