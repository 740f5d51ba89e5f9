//! Sesiones con token bearer validadas en servidor.
//!
//! `POST /login` verifica la contraseña (hash SHA-256) y emite un token
//! UUID guardado en `sesiones` con caducidad. Cada handler protegido
//! extrae [`Auth`], que valida el token contra la base de datos y carga
//! los roles del usuario.

use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::ApiError;

/// Roles con acceso de mostrador (crear reservas, cambios, etc.).
pub const PERSONAL: &[&str] = &["admin", "junta", "empleado"];
/// Roles de dirección del club.
pub const DIRECTIVA: &[&str] = &["admin", "junta"];
/// Solo administración.
pub const SOLO_ADMIN: &[&str] = &["admin"];

pub fn hash_contrasena(contrasena: &str) -> String {
    let digest = Sha256::digest(contrasena.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// =====================================
// CONTEXTO AUTENTICADO
// =====================================

#[derive(Debug, Clone)]
pub struct Auth {
    pub token: Uuid,
    pub id_usuario: i32,
    pub id_socio: Option<i32>,
    pub roles: Vec<String>,
}

impl Auth {
    pub fn exigir_rol(&self, permitidos: &[&str]) -> Result<(), ApiError> {
        if self.roles.iter().any(|r| permitidos.contains(&r.as_str())) {
            Ok(())
        } else {
            Err(ApiError::Prohibido)
        }
    }

    async fn validar(pool: &PgPool, token: Uuid) -> Result<Auth, ApiError> {
        #[derive(FromRow)]
        struct SesionRow {
            id_usuario: i32,
            id_socio: Option<i32>,
        }

        let sesion = sqlx::query_as::<_, SesionRow>(
            r#"
            SELECT u.id_usuario, u.id_socio
            FROM sesiones s
            JOIN usuarios u ON u.id_usuario = s.id_usuario
            WHERE s.token = $1
              AND s.expira_en > NOW()
              AND u.activo
            "#,
        )
        .bind(token)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NoAutorizado)?;

        let roles = sqlx::query_scalar::<_, String>(
            r#"
            SELECT r.nombre
            FROM usuario_roles ur
            JOIN roles r ON r.id_rol = ur.id_rol
            WHERE ur.id_usuario = $1
            "#,
        )
        .bind(sesion.id_usuario)
        .fetch_all(pool)
        .await?;

        Ok(Auth {
            token,
            id_usuario: sesion.id_usuario,
            id_socio: sesion.id_socio,
            roles,
        })
    }
}

fn token_bearer(req: &HttpRequest) -> Option<Uuid> {
    let valor = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = valor.strip_prefix("Bearer ")?;
    Uuid::parse_str(token.trim()).ok()
}

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Auth, ApiError>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let pool = req.app_data::<web::Data<PgPool>>().cloned();
        let token = token_bearer(req);

        Box::pin(async move {
            let pool = pool.ok_or(ApiError::NoAutorizado)?;
            let token = token.ok_or(ApiError::NoAutorizado)?;
            Auth::validar(pool.get_ref(), token).await
        })
    }
}

// =====================================
// LOGIN / LOGOUT
// =====================================

#[derive(Deserialize)]
struct LoginInput {
    correo: String,
    contrasena: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: Uuid,
    id_usuario: i32,
    id_socio: Option<i32>,
    nombre: String,
    roles: Vec<String>,
    expira_en: DateTime<Utc>,
}

fn horas_sesion() -> i64 {
    std::env::var("SESION_HORAS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(12)
}

async fn login(
    pool: web::Data<PgPool>,
    creds: web::Json<LoginInput>,
) -> Result<HttpResponse, ApiError> {
    #[derive(FromRow)]
    struct UsuarioRow {
        id_usuario: i32,
        id_socio: Option<i32>,
        contrasena_hash: String,
        nombre: String,
    }

    let usuario = sqlx::query_as::<_, UsuarioRow>(
        r#"
        SELECT id_usuario, id_socio, contrasena_hash, nombre
        FROM usuarios
        WHERE lower(correo_login) = lower($1) AND activo
        "#,
    )
    .bind(creds.correo.trim())
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::Validacion("Usuario o contraseña incorrectos".to_string()))?;

    if usuario.contrasena_hash != hash_contrasena(&creds.contrasena) {
        return Err(ApiError::Validacion(
            "Usuario o contraseña incorrectos".to_string(),
        ));
    }

    // Limpieza oportunista de sesiones caducadas
    sqlx::query("DELETE FROM sesiones WHERE expira_en < NOW()")
        .execute(pool.get_ref())
        .await?;

    let token = Uuid::new_v4();
    let expira_en = Utc::now() + Duration::hours(horas_sesion());

    sqlx::query("INSERT INTO sesiones (token, id_usuario, expira_en) VALUES ($1, $2, $3)")
        .bind(token)
        .bind(usuario.id_usuario)
        .bind(expira_en)
        .execute(pool.get_ref())
        .await?;

    let roles = sqlx::query_scalar::<_, String>(
        r#"
        SELECT r.nombre
        FROM usuario_roles ur
        JOIN roles r ON r.id_rol = ur.id_rol
        WHERE ur.id_usuario = $1
        "#,
    )
    .bind(usuario.id_usuario)
    .fetch_all(pool.get_ref())
    .await?;

    tracing::info!(id_usuario = usuario.id_usuario, "login correcto");

    Ok(HttpResponse::Ok().json(LoginResponse {
        token,
        id_usuario: usuario.id_usuario,
        id_socio: usuario.id_socio,
        nombre: usuario.nombre,
        roles,
        expira_en,
    }))
}

async fn logout(pool: web::Data<PgPool>, auth: Auth) -> Result<HttpResponse, ApiError> {
    sqlx::query("DELETE FROM sesiones WHERE token = $1")
        .bind(auth.token)
        .execute(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true })))
}

pub fn configurar(cfg: &mut web::ServiceConfig) {
    cfg.route("/login", web::post().to(login))
        .route("/logout", web::post().to(logout));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_es_sha256_hex() {
        // sha256("admin"), mismo valor que siembra la migración
        assert_eq!(
            hash_contrasena("admin"),
            "8c6976e5b5410415bde908bd4dee15dfb167a9c873fc4bb8a81f6f2ab448a918"
        );
    }

    #[test]
    fn exigir_rol_acepta_cualquiera_de_la_lista() {
        let auth = Auth {
            token: Uuid::nil(),
            id_usuario: 1,
            id_socio: None,
            roles: vec!["empleado".to_string()],
        };
        assert!(auth.exigir_rol(PERSONAL).is_ok());
        assert!(auth.exigir_rol(DIRECTIVA).is_err());
    }
}
