//! Reservas de instalaciones: alta con detección de conflicto y lista de
//! espera, edición, confirmación, liquidación y cancelación.
//!
//! El precio siempre se calcula en servidor a partir del servicio y los
//! suplementos seleccionados; lo que mande el cliente como total se ignora.
//! Todas las mutaciones exigen la `version` vigente de la reserva y la
//! incrementan, rechazando escrituras sobre una copia obsoleta.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::BTreeMap;

use crate::auth::{self, Auth};
use crate::dinero::centavos_a_str;
use crate::error::ApiError;
use crate::precio::{
    evaluar_cancelacion, precio_reserva, resolver_alta, validar_liquidacion, Estado,
    LineaSuplemento, Motivo, SuplementoPrecio, TipoSuplemento,
};

// =====================================
// FILAS Y DTOS
// =====================================

#[derive(Serialize, FromRow)]
struct ReservaRow {
    id_reserva: i32,
    fecha: NaiveDate,
    id_servicio: i32,
    servicio_nombre: String,
    id_socio: i32,
    socio_nombre: String,
    precio_centavos: i64,
    estado: String,
    monto_abonado_centavos: i64,
    metodo_pago: Option<String>,
    observaciones: Option<String>,
    motivo_cancelacion: Option<String>,
    monto_devuelto_centavos: i64,
    pendiente_revision_junta: bool,
    version: i32,
    creado_en: DateTime<Utc>,
}

#[derive(Serialize, FromRow)]
struct SuplementoLineaRow {
    id_suplemento: i32,
    nombre: String,
    tipo: String,
    cantidad: i32,
    precio_centavos: i64,
}

#[derive(Serialize, FromRow)]
struct PagoRow {
    id_pago: i32,
    concepto: String,
    monto_centavos: i64,
    metodo: String,
    fecha: DateTime<Utc>,
}

#[derive(Serialize)]
struct ReservaCompleta {
    #[serde(flatten)]
    reserva: ReservaRow,
    suplementos: Vec<SuplementoLineaRow>,
    pagos: Vec<PagoRow>,
}

#[derive(Deserialize)]
struct ReservaInput {
    fecha: NaiveDate,
    id_servicio: i32,
    id_socio: i32,
    #[serde(default)]
    suplementos: Vec<LineaSuplemento>,
    monto_abonado_centavos: Option<i64>,
    metodo_pago: Option<String>,
    observaciones: Option<String>,
}

#[derive(Deserialize)]
struct ReservaEdicion {
    fecha: NaiveDate,
    id_servicio: i32,
    #[serde(default)]
    suplementos: Vec<LineaSuplemento>,
    observaciones: Option<String>,
    version: i32,
}

#[derive(Deserialize)]
struct ConfirmarInput {
    version: i32,
}

#[derive(Deserialize)]
struct LiquidarInput {
    monto_centavos: i64,
    metodo_pago: String,
    suplementos: Option<Vec<LineaSuplemento>>,
    version: i32,
}

#[derive(Deserialize)]
struct CancelarInput {
    motivo: Motivo,
    observaciones: Option<String>,
    monto_devuelto_centavos: Option<i64>,
    version: i32,
}

#[derive(Deserialize)]
struct ListadoQuery {
    fecha: Option<NaiveDate>,
    id_socio: Option<i32>,
    estado: Option<String>,
}

// =====================================
// AYUDANTES DE CARGA
// =====================================

const SELECT_RESERVA: &str = r#"
    SELECT r.id_reserva, r.fecha, r.id_servicio, s.nombre AS servicio_nombre,
           r.id_socio, (so.nombre || ' ' || so.primer_apellido) AS socio_nombre,
           r.precio_centavos, r.estado, r.monto_abonado_centavos, r.metodo_pago,
           r.observaciones, r.motivo_cancelacion, r.monto_devuelto_centavos,
           r.pendiente_revision_junta, r.version, r.creado_en
    FROM reservas r
    JOIN servicios s ON s.id_servicio = r.id_servicio
    JOIN socios so ON so.id_socio = r.id_socio
"#;

async fn precio_servicio_activo(
    conn: &mut PgConnection,
    id_servicio: i32,
) -> Result<i64, ApiError> {
    sqlx::query_scalar::<_, i64>(
        "SELECT precio_centavos FROM servicios WHERE id_servicio = $1 AND activo",
    )
    .bind(id_servicio)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        ApiError::Validacion(format!(
            "Servicio no existe o está inactivo: {id_servicio}"
        ))
    })
}

async fn comprobar_socio(conn: &mut PgConnection, id_socio: i32) -> Result<(), ApiError> {
    let activo = sqlx::query_scalar::<_, bool>("SELECT activo FROM socios WHERE id_socio = $1")
        .bind(id_socio)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::Validacion(format!("No existe el socio {id_socio}")))?;

    if !activo {
        return Err(ApiError::Validacion(format!(
            "El socio {id_socio} está dado de baja"
        )));
    }
    Ok(())
}

async fn catalogo_suplementos(
    conn: &mut PgConnection,
    seleccion: &[LineaSuplemento],
) -> Result<Vec<SuplementoPrecio>, ApiError> {
    if seleccion.is_empty() {
        return Ok(Vec::new());
    }

    #[derive(FromRow)]
    struct Row {
        id_suplemento: i32,
        precio_centavos: i64,
        tipo: String,
    }

    let ids: Vec<i32> = seleccion.iter().map(|l| l.id_suplemento).collect();

    let filas = sqlx::query_as::<_, Row>(
        r#"
        SELECT id_suplemento, precio_centavos, tipo
        FROM suplementos
        WHERE activo AND id_suplemento = ANY($1)
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    filas
        .into_iter()
        .map(|f| {
            let tipo = TipoSuplemento::parse(&f.tipo).ok_or_else(|| {
                ApiError::Validacion(format!("Tipo de suplemento desconocido: {}", f.tipo))
            })?;
            Ok(SuplementoPrecio {
                id_suplemento: f.id_suplemento,
                precio_centavos: f.precio_centavos,
                tipo,
            })
        })
        .collect()
}

fn agrupar_lineas(seleccion: &[LineaSuplemento]) -> Vec<LineaSuplemento> {
    let mut agrupadas: BTreeMap<i32, i32> = BTreeMap::new();
    for linea in seleccion {
        *agrupadas.entry(linea.id_suplemento).or_insert(0) += linea.cantidad;
    }
    agrupadas
        .into_iter()
        .map(|(id_suplemento, cantidad)| LineaSuplemento {
            id_suplemento,
            cantidad,
        })
        .collect()
}

async fn reemplazar_lineas(
    conn: &mut PgConnection,
    id_reserva: i32,
    seleccion: &[LineaSuplemento],
) -> Result<(), ApiError> {
    sqlx::query("DELETE FROM reserva_suplementos WHERE id_reserva = $1")
        .bind(id_reserva)
        .execute(&mut *conn)
        .await?;

    for linea in agrupar_lineas(seleccion) {
        sqlx::query(
            r#"
            INSERT INTO reserva_suplementos (id_reserva, id_suplemento, cantidad)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id_reserva)
        .bind(linea.id_suplemento)
        .bind(linea.cantidad)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn cargar_reserva(conn: &mut PgConnection, id: i32) -> Result<ReservaCompleta, ApiError> {
    let sql = format!("{SELECT_RESERVA} WHERE r.id_reserva = $1");
    let reserva = sqlx::query_as::<_, ReservaRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::NoEncontrado(format!("No existe la reserva {id}")))?;

    let suplementos = sqlx::query_as::<_, SuplementoLineaRow>(
        r#"
        SELECT rs.id_suplemento, su.nombre, su.tipo, rs.cantidad, su.precio_centavos
        FROM reserva_suplementos rs
        JOIN suplementos su ON su.id_suplemento = rs.id_suplemento
        WHERE rs.id_reserva = $1
        ORDER BY su.nombre
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let pagos = sqlx::query_as::<_, PagoRow>(
        r#"
        SELECT id_pago, concepto, monto_centavos, metodo, fecha
        FROM pagos_reserva
        WHERE id_reserva = $1
        ORDER BY fecha
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ReservaCompleta {
        reserva,
        suplementos,
        pagos,
    })
}

// =====================================
// CONFLICTO / LISTA DE ESPERA
// =====================================

// Lock consultivo por (servicio, fecha) para que dos altas simultáneas
// no pasen las dos la comprobación de conflicto.
fn clave_bloqueo(id_servicio: i32, fecha: NaiveDate) -> i64 {
    let clave_fecha = (fecha.year() as i64) * 10_000
        + (fecha.month() as i64) * 100
        + (fecha.day() as i64);
    (id_servicio as i64) * 100_000_000 + clave_fecha
}

async fn bloquear_dia(
    conn: &mut PgConnection,
    id_servicio: i32,
    fecha: NaiveDate,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(clave_bloqueo(id_servicio, fecha))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// `contar_lista_espera`: en el alta cualquier reserva no cancelada bloquea;
// al confirmar, otras reservas en lista de espera no ocupan el hueco.
async fn hay_conflicto(
    conn: &mut PgConnection,
    id_servicio: i32,
    fecha: NaiveDate,
    excluir: Option<i32>,
    contar_lista_espera: bool,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)::BIGINT
        FROM reservas
        WHERE id_servicio = $1
          AND fecha = $2
          AND estado <> 'CANCELADA'
          AND ($3::int IS NULL OR id_reserva <> $3)
          AND ($4 OR estado <> 'LISTA_ESPERA')
        "#,
    )
    .bind(id_servicio)
    .bind(fecha)
    .bind(excluir)
    .bind(contar_lista_espera)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count > 0)
}

fn comprobar_version(actual: i32, enviada: i32) -> Result<(), ApiError> {
    if actual == enviada {
        Ok(())
    } else {
        Err(ApiError::Conflicto(
            "La reserva fue modificada por otro usuario".to_string(),
        ))
    }
}

#[derive(FromRow)]
struct ReservaBloqueada {
    fecha: NaiveDate,
    id_servicio: i32,
    precio_centavos: i64,
    estado: String,
    monto_abonado_centavos: i64,
    version: i32,
}

async fn bloquear_reserva(
    conn: &mut PgConnection,
    id: i32,
) -> Result<(ReservaBloqueada, Estado), ApiError> {
    let fila = sqlx::query_as::<_, ReservaBloqueada>(
        r#"
        SELECT fecha, id_servicio, precio_centavos, estado,
               monto_abonado_centavos, version
        FROM reservas
        WHERE id_reserva = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ApiError::NoEncontrado(format!("No existe la reserva {id}")))?;

    let estado = Estado::parse(&fila.estado)
        .ok_or_else(|| ApiError::Validacion(format!("Estado desconocido: {}", fila.estado)))?;

    Ok((fila, estado))
}

// =====================================
// HANDLERS
// =====================================

// GET /reservas?fecha=&id_socio=&estado=
async fn listar(
    pool: web::Data<PgPool>,
    auth: Auth,
    q: web::Query<ListadoQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;

    if let Some(estado) = &q.estado {
        if Estado::parse(estado).is_none() {
            return Err(ApiError::Validacion(format!("Estado desconocido: {estado}")));
        }
    }

    let sql = format!(
        r#"{SELECT_RESERVA}
        WHERE ($1::date IS NULL OR r.fecha = $1)
          AND ($2::int IS NULL OR r.id_socio = $2)
          AND ($3::text IS NULL OR r.estado = $3)
        ORDER BY r.fecha DESC, r.id_reserva DESC
        "#
    );

    let reservas = sqlx::query_as::<_, ReservaRow>(&sql)
        .bind(q.fecha)
        .bind(q.id_socio)
        .bind(&q.estado)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(reservas))
}

async fn obtener(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;
    let mut conn = pool.acquire().await?;
    let reserva = cargar_reserva(&mut conn, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(reserva))
}

// POST /reservas
async fn crear(
    pool: web::Data<PgPool>,
    auth: Auth,
    datos: web::Json<ReservaInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;

    let mut tx = pool.begin().await?;

    comprobar_socio(&mut tx, datos.id_socio).await?;
    let precio_servicio = precio_servicio_activo(&mut tx, datos.id_servicio).await?;
    let catalogo = catalogo_suplementos(&mut tx, &datos.suplementos).await?;
    let precio = precio_reserva(precio_servicio, &datos.suplementos, &catalogo)?;

    let anticipo = datos.monto_abonado_centavos.unwrap_or(0);
    let metodo = datos
        .metodo_pago
        .as_ref()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());

    bloquear_dia(&mut tx, datos.id_servicio, datos.fecha).await?;
    let conflicto = hay_conflicto(&mut tx, datos.id_servicio, datos.fecha, None, true).await?;

    // Con conflicto la reserva entra en lista de espera con el pago anulado,
    // así que los campos de pago solo se validan si la reserva entra de verdad.
    let alta = resolver_alta(conflicto, anticipo, metodo);
    if !conflicto {
        if alta.anticipo_centavos < 0 {
            return Err(ApiError::Validacion(
                "El anticipo no puede ser negativo".to_string(),
            ));
        }
        if alta.anticipo_centavos > precio {
            return Err(ApiError::Validacion(format!(
                "El anticipo no puede superar el precio ({})",
                centavos_a_str(precio)
            )));
        }
        if alta.anticipo_centavos > 0 && alta.metodo_pago.is_none() {
            return Err(ApiError::Validacion(
                "Indica el método de pago del anticipo".to_string(),
            ));
        }
    }

    let id_reserva: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO reservas (fecha, id_servicio, id_socio, precio_centavos, estado,
                              monto_abonado_centavos, metodo_pago, observaciones)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id_reserva
        "#,
    )
    .bind(datos.fecha)
    .bind(datos.id_servicio)
    .bind(datos.id_socio)
    .bind(precio)
    .bind(alta.estado.as_str())
    .bind(alta.anticipo_centavos)
    .bind(&alta.metodo_pago)
    .bind(&datos.observaciones)
    .fetch_one(&mut *tx)
    .await?;

    reemplazar_lineas(&mut tx, id_reserva, &datos.suplementos).await?;

    if alta.anticipo_centavos > 0 {
        sqlx::query(
            r#"
            INSERT INTO pagos_reserva (id_reserva, concepto, monto_centavos, metodo)
            VALUES ($1, 'ANTICIPO', $2, $3)
            "#,
        )
        .bind(id_reserva)
        .bind(alta.anticipo_centavos)
        .bind(alta.metodo_pago.as_deref().unwrap_or(""))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    if conflicto {
        tracing::warn!(id_reserva, "reserva en lista de espera por conflicto de fecha");
    }

    let mut conn = pool.acquire().await?;
    let reserva = cargar_reserva(&mut conn, id_reserva).await?;
    Ok(HttpResponse::Created().json(reserva))
}

// PUT /reservas/{id}
async fn actualizar(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
    datos: web::Json<ReservaEdicion>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;
    let id = path.into_inner();

    let mut tx = pool.begin().await?;
    let (actual, estado) = bloquear_reserva(&mut tx, id).await?;

    if !estado.es_abierta() {
        return Err(ApiError::Validacion(format!(
            "Una reserva {} no se puede editar",
            estado.as_str()
        )));
    }
    comprobar_version(actual.version, datos.version)?;

    let precio_servicio = precio_servicio_activo(&mut tx, datos.id_servicio).await?;
    let catalogo = catalogo_suplementos(&mut tx, &datos.suplementos).await?;
    let precio = precio_reserva(precio_servicio, &datos.suplementos, &catalogo)?;

    if actual.monto_abonado_centavos > precio {
        return Err(ApiError::Validacion(format!(
            "El nuevo precio ({}) queda por debajo de lo ya abonado ({})",
            centavos_a_str(precio),
            centavos_a_str(actual.monto_abonado_centavos)
        )));
    }

    // Al editar no se pasa a lista de espera: mover la reserva a un hueco
    // ocupado se rechaza directamente.
    if datos.fecha != actual.fecha || datos.id_servicio != actual.id_servicio {
        bloquear_dia(&mut tx, datos.id_servicio, datos.fecha).await?;
        if hay_conflicto(&mut tx, datos.id_servicio, datos.fecha, Some(id), true).await? {
            return Err(ApiError::Conflicto(
                "La instalación ya está reservada ese día".to_string(),
            ));
        }
    }

    let res = sqlx::query(
        r#"
        UPDATE reservas
        SET fecha = $1, id_servicio = $2, precio_centavos = $3,
            observaciones = $4, version = version + 1
        WHERE id_reserva = $5 AND version = $6
        "#,
    )
    .bind(datos.fecha)
    .bind(datos.id_servicio)
    .bind(precio)
    .bind(&datos.observaciones)
    .bind(id)
    .bind(datos.version)
    .execute(&mut *tx)
    .await?;

    if res.rows_affected() == 0 {
        return Err(ApiError::Conflicto(
            "La reserva fue modificada por otro usuario".to_string(),
        ));
    }

    reemplazar_lineas(&mut tx, id, &datos.suplementos).await?;
    tx.commit().await?;

    let mut conn = pool.acquire().await?;
    let reserva = cargar_reserva(&mut conn, id).await?;
    Ok(HttpResponse::Ok().json(reserva))
}

// PATCH /reservas/{id}/confirmar
async fn confirmar(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
    datos: web::Json<ConfirmarInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;
    let id = path.into_inner();

    let mut tx = pool.begin().await?;
    let (actual, estado) = bloquear_reserva(&mut tx, id).await?;

    if !matches!(estado, Estado::Pendiente | Estado::ListaEspera) {
        return Err(ApiError::Validacion(format!(
            "Una reserva {} no se puede confirmar",
            estado.as_str()
        )));
    }
    comprobar_version(actual.version, datos.version)?;

    if estado == Estado::ListaEspera {
        bloquear_dia(&mut tx, actual.id_servicio, actual.fecha).await?;
        if hay_conflicto(&mut tx, actual.id_servicio, actual.fecha, Some(id), false).await? {
            return Err(ApiError::Conflicto(
                "La instalación sigue ocupada ese día".to_string(),
            ));
        }
    }

    sqlx::query(
        r#"
        UPDATE reservas
        SET estado = 'CONFIRMADA', version = version + 1
        WHERE id_reserva = $1 AND version = $2
        "#,
    )
    .bind(id)
    .bind(datos.version)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let mut conn = pool.acquire().await?;
    let reserva = cargar_reserva(&mut conn, id).await?;
    Ok(HttpResponse::Ok().json(reserva))
}

// POST /reservas/{id}/liquidar
async fn liquidar(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
    datos: web::Json<LiquidarInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;
    let id = path.into_inner();

    let metodo = datos.metodo_pago.trim();
    if metodo.is_empty() {
        return Err(ApiError::Validacion(
            "Indica el método de pago".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let (actual, estado) = bloquear_reserva(&mut tx, id).await?;

    match estado {
        Estado::Pendiente | Estado::Confirmada => {}
        Estado::ListaEspera => {
            return Err(ApiError::Validacion(
                "Una reserva en lista de espera debe confirmarse antes de liquidarse".to_string(),
            ));
        }
        otro => {
            return Err(ApiError::Validacion(format!(
                "Una reserva {} no se puede liquidar",
                otro.as_str()
            )));
        }
    }
    comprobar_version(actual.version, datos.version)?;

    // Con lista de suplementos revisada se reprecia antes de comparar montos.
    let precio = match &datos.suplementos {
        Some(seleccion) => {
            let precio_servicio = precio_servicio_activo(&mut tx, actual.id_servicio).await?;
            let catalogo = catalogo_suplementos(&mut tx, seleccion).await?;
            let precio = precio_reserva(precio_servicio, seleccion, &catalogo)?;
            reemplazar_lineas(&mut tx, id, seleccion).await?;
            precio
        }
        None => actual.precio_centavos,
    };

    if actual.monto_abonado_centavos > precio {
        return Err(ApiError::Validacion(format!(
            "El nuevo precio ({}) queda por debajo de lo ya abonado ({})",
            centavos_a_str(precio),
            centavos_a_str(actual.monto_abonado_centavos)
        )));
    }

    validar_liquidacion(precio, actual.monto_abonado_centavos, datos.monto_centavos)?;

    sqlx::query(
        r#"
        UPDATE reservas
        SET estado = 'COMPLETADA', precio_centavos = $1, monto_abonado_centavos = $1,
            metodo_pago = $2, version = version + 1
        WHERE id_reserva = $3 AND version = $4
        "#,
    )
    .bind(precio)
    .bind(metodo)
    .bind(id)
    .bind(datos.version)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO pagos_reserva (id_reserva, concepto, monto_centavos, metodo)
        VALUES ($1, 'LIQUIDACION', $2, $3)
        "#,
    )
    .bind(id)
    .bind(datos.monto_centavos)
    .bind(metodo)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(id_reserva = id, "reserva liquidada");

    let mut conn = pool.acquire().await?;
    let reserva = cargar_reserva(&mut conn, id).await?;
    Ok(HttpResponse::Ok().json(reserva))
}

// POST /reservas/{id}/cancelar
async fn cancelar(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
    datos: web::Json<CancelarInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;
    let id = path.into_inner();

    let mut tx = pool.begin().await?;
    let (actual, estado) = bloquear_reserva(&mut tx, id).await?;

    if !estado.es_abierta() {
        return Err(ApiError::Validacion(format!(
            "Una reserva {} no se puede cancelar",
            estado.as_str()
        )));
    }
    comprobar_version(actual.version, datos.version)?;

    let hoy = Local::now().date_naive();
    let resultado = evaluar_cancelacion(
        datos.motivo,
        actual.fecha,
        hoy,
        actual.monto_abonado_centavos,
        datos.monto_devuelto_centavos,
        datos.observaciones.as_deref(),
    )?;

    sqlx::query(
        r#"
        UPDATE reservas
        SET estado = 'CANCELADA', motivo_cancelacion = $1,
            monto_devuelto_centavos = $2, pendiente_revision_junta = $3,
            observaciones = COALESCE($4, observaciones), version = version + 1
        WHERE id_reserva = $5 AND version = $6
        "#,
    )
    .bind(datos.motivo.as_str())
    .bind(resultado.monto_devuelto_centavos)
    .bind(resultado.pendiente_revision_junta)
    .bind(&datos.observaciones)
    .bind(id)
    .bind(datos.version)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    if resultado.pendiente_revision_junta {
        tracing::warn!(id_reserva = id, "cancelación pendiente de revisión de la junta");
    }

    let mut conn = pool.acquire().await?;
    let reserva = cargar_reserva(&mut conn, id).await?;
    Ok(HttpResponse::Ok().json(reserva))
}

// DELETE /reservas/{id} — borrado físico, solo dirección
async fn eliminar(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::DIRECTIVA)?;
    let id = path.into_inner();

    let res = sqlx::query("DELETE FROM reservas WHERE id_reserva = $1")
        .bind(id)
        .execute(pool.get_ref())
        .await?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NoEncontrado(format!("No existe la reserva {id}")));
    }

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

// GET /reservas/{id}/recibo — JSON para que el cliente genere el PDF
async fn recibo(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;
    let mut conn = pool.acquire().await?;
    let completa = cargar_reserva(&mut conn, path.into_inner()).await?;
    let r = &completa.reserva;

    let lineas: Vec<serde_json::Value> = completa
        .suplementos
        .iter()
        .map(|s| {
            let importe = if s.tipo == "porHora" {
                s.precio_centavos * i64::from(s.cantidad)
            } else {
                s.precio_centavos
            };
            json!({
                "concepto": s.nombre,
                "cantidad": s.cantidad,
                "importe": centavos_a_str(importe),
            })
        })
        .collect();

    let pagos: Vec<serde_json::Value> = completa
        .pagos
        .iter()
        .map(|p| {
            json!({
                "concepto": p.concepto,
                "monto": centavos_a_str(p.monto_centavos),
                "metodo": p.metodo,
                "fecha": p.fecha,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "numero": r.id_reserva,
        "fecha": r.fecha,
        "servicio": r.servicio_nombre,
        "socio": r.socio_nombre,
        "estado": r.estado,
        "lineas": lineas,
        "precio": centavos_a_str(r.precio_centavos),
        "abonado": centavos_a_str(r.monto_abonado_centavos),
        "pendiente": centavos_a_str(r.precio_centavos - r.monto_abonado_centavos),
        "devuelto": centavos_a_str(r.monto_devuelto_centavos),
        "pagos": pagos,
    })))
}

pub fn configurar(cfg: &mut web::ServiceConfig) {
    cfg.route("/reservas", web::get().to(listar))
        .route("/reservas", web::post().to(crear))
        .route("/reservas/{id}", web::get().to(obtener))
        .route("/reservas/{id}", web::put().to(actualizar))
        .route("/reservas/{id}", web::delete().to(eliminar))
        .route("/reservas/{id}/confirmar", web::patch().to(confirmar))
        .route("/reservas/{id}/liquidar", web::post().to(liquidar))
        .route("/reservas/{id}/cancelar", web::post().to(cancelar))
        .route("/reservas/{id}/recibo", web::get().to(recibo));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clave_de_bloqueo_distingue_servicio_y_dia() {
        let d1 = NaiveDate::from_ymd_opt(2026, 8, 23).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 8, 24).unwrap();
        assert_ne!(clave_bloqueo(1, d1), clave_bloqueo(1, d2));
        assert_ne!(clave_bloqueo(1, d1), clave_bloqueo(2, d1));
        assert_eq!(clave_bloqueo(3, d1), clave_bloqueo(3, d1));
    }

    #[test]
    fn agrupar_suma_cantidades_repetidas() {
        let lineas = vec![
            LineaSuplemento { id_suplemento: 2, cantidad: 1 },
            LineaSuplemento { id_suplemento: 1, cantidad: 2 },
            LineaSuplemento { id_suplemento: 2, cantidad: 3 },
        ];
        let agrupadas = agrupar_lineas(&lineas);
        assert_eq!(agrupadas.len(), 2);
        assert_eq!(agrupadas[0].id_suplemento, 1);
        assert_eq!(agrupadas[0].cantidad, 2);
        assert_eq!(agrupadas[1].id_suplemento, 2);
        assert_eq!(agrupadas[1].cantidad, 4);
    }
}
