//! Reglas de negocio puras de las reservas: cálculo de precio,
//! validación de liquidación y reglas de cancelación/devolución.
//!
//! Todo trabaja en centavos y sin tocar la base de datos, para poder
//! probarse de forma aislada.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::error::ApiError;

// =====================================
// ESTADOS Y MOTIVOS
// =====================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Estado {
    Pendiente,
    Confirmada,
    Cancelada,
    Completada,
    ListaEspera,
}

impl Estado {
    pub fn as_str(self) -> &'static str {
        match self {
            Estado::Pendiente => "PENDIENTE",
            Estado::Confirmada => "CONFIRMADA",
            Estado::Cancelada => "CANCELADA",
            Estado::Completada => "COMPLETADA",
            Estado::ListaEspera => "LISTA_ESPERA",
        }
    }

    pub fn parse(s: &str) -> Option<Estado> {
        match s {
            "PENDIENTE" => Some(Estado::Pendiente),
            "CONFIRMADA" => Some(Estado::Confirmada),
            "CANCELADA" => Some(Estado::Cancelada),
            "COMPLETADA" => Some(Estado::Completada),
            "LISTA_ESPERA" => Some(Estado::ListaEspera),
            _ => None,
        }
    }

    /// Estados desde los que la reserva todavía admite cambios.
    pub fn es_abierta(self) -> bool {
        matches!(
            self,
            Estado::Pendiente | Estado::Confirmada | Estado::ListaEspera
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Motivo {
    Clima,
    Anticipada,
    Otro,
}

impl Motivo {
    pub fn as_str(self) -> &'static str {
        match self {
            Motivo::Clima => "CLIMA",
            Motivo::Anticipada => "ANTICIPADA",
            Motivo::Otro => "OTRO",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TipoSuplemento {
    #[serde(rename = "fijo")]
    Fijo,
    #[serde(rename = "porHora")]
    PorHora,
}

impl TipoSuplemento {
    pub fn parse(s: &str) -> Option<TipoSuplemento> {
        match s {
            "fijo" => Some(TipoSuplemento::Fijo),
            "porHora" => Some(TipoSuplemento::PorHora),
            _ => None,
        }
    }
}

// =====================================
// ERRORES DE REGLA
// =====================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReglaError {
    #[error("Suplemento no existe o está inactivo: {0}")]
    SuplementoNoEncontrado(i32),

    #[error("La cantidad del suplemento {0} debe ser al menos 1")]
    CantidadInvalida(i32),

    #[error("El monto no coincide con el pendiente ({0})")]
    MontoNoCoincide(String),

    #[error("La cancelación por clima solo se permite el mismo día de la reserva")]
    ClimaFueraDeDia,

    #[error("La cancelación anticipada con menos de 9 días requiere observaciones")]
    AnticipadaSinObservaciones,

    #[error("La devolución solicitada no puede ser negativa")]
    DevolucionNegativa,
}

impl From<ReglaError> for ApiError {
    fn from(e: ReglaError) -> Self {
        ApiError::Validacion(e.to_string())
    }
}

// =====================================
// PRECIO
// =====================================

/// Línea de suplemento tal como llega en la petición.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineaSuplemento {
    pub id_suplemento: i32,
    pub cantidad: i32,
}

/// Entrada del catálogo de suplementos ya cargada de la base de datos.
#[derive(Debug, Clone)]
pub struct SuplementoPrecio {
    pub id_suplemento: i32,
    pub precio_centavos: i64,
    pub tipo: TipoSuplemento,
}

/// Precio total de una reserva: precio plano del servicio más las líneas
/// de suplemento. Las líneas repetidas se agrupan sumando cantidades antes
/// de valorar; los suplementos `fijo` cuentan una sola vez, los `porHora`
/// multiplican precio por cantidad. Un id que no esté en el catálogo es
/// error del llamador, no se omite en silencio.
pub fn precio_reserva(
    precio_servicio: i64,
    seleccion: &[LineaSuplemento],
    catalogo: &[SuplementoPrecio],
) -> Result<i64, ReglaError> {
    let mut agrupadas: BTreeMap<i32, i64> = BTreeMap::new();
    for linea in seleccion {
        if linea.cantidad < 1 {
            return Err(ReglaError::CantidadInvalida(linea.id_suplemento));
        }
        *agrupadas.entry(linea.id_suplemento).or_insert(0) += i64::from(linea.cantidad);
    }

    let mut total = precio_servicio;
    for (id, cantidad) in agrupadas {
        let sup = catalogo
            .iter()
            .find(|s| s.id_suplemento == id)
            .ok_or(ReglaError::SuplementoNoEncontrado(id))?;
        total += match sup.tipo {
            TipoSuplemento::Fijo => sup.precio_centavos,
            TipoSuplemento::PorHora => sup.precio_centavos * cantidad,
        };
    }

    Ok(total)
}

// =====================================
// ALTA / LISTA DE ESPERA
// =====================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltaReserva {
    pub estado: Estado,
    pub anticipo_centavos: i64,
    pub metodo_pago: Option<String>,
}

/// Colocación de una reserva nueva. Con conflicto de (servicio, fecha) la
/// reserva entra en lista de espera y el pago se anula, se ignore lo que
/// venga en la petición; sin conflicto queda pendiente con su anticipo.
pub fn resolver_alta(
    conflicto: bool,
    anticipo_centavos: i64,
    metodo_pago: Option<String>,
) -> AltaReserva {
    if conflicto {
        AltaReserva {
            estado: Estado::ListaEspera,
            anticipo_centavos: 0,
            metodo_pago: None,
        }
    } else {
        AltaReserva {
            estado: Estado::Pendiente,
            anticipo_centavos,
            metodo_pago,
        }
    }
}

// =====================================
// LIQUIDACIÓN
// =====================================

/// La liquidación exige pagar exactamente el pendiente.
pub fn validar_liquidacion(
    precio_centavos: i64,
    monto_abonado_centavos: i64,
    monto_centavos: i64,
) -> Result<(), ReglaError> {
    let pendiente = precio_centavos - monto_abonado_centavos;
    if monto_centavos != pendiente {
        return Err(ReglaError::MontoNoCoincide(crate::dinero::centavos_a_str(
            pendiente,
        )));
    }
    Ok(())
}

// =====================================
// CANCELACIÓN
// =====================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelacion {
    pub monto_devuelto_centavos: i64,
    pub pendiente_revision_junta: bool,
}

/// Regla de devolución según motivo y días de antelación:
/// - CLIMA: solo el mismo día; devuelve todo lo abonado.
/// - ANTICIPADA con menos de 9 días: exige observaciones, queda pendiente
///   de revisión por la junta y no devuelve nada automáticamente.
/// - ANTICIPADA con 9 días o más: devuelve lo solicitado, con tope en lo
///   abonado (por defecto, todo lo abonado).
/// - OTRO: sin devolución automática.
pub fn evaluar_cancelacion(
    motivo: Motivo,
    fecha_reserva: NaiveDate,
    hoy: NaiveDate,
    monto_abonado_centavos: i64,
    devolucion_solicitada: Option<i64>,
    observaciones: Option<&str>,
) -> Result<Cancelacion, ReglaError> {
    let dias_diferencia = (fecha_reserva - hoy).num_days();

    match motivo {
        Motivo::Clima => {
            if fecha_reserva != hoy {
                return Err(ReglaError::ClimaFueraDeDia);
            }
            Ok(Cancelacion {
                monto_devuelto_centavos: monto_abonado_centavos,
                pendiente_revision_junta: false,
            })
        }
        Motivo::Anticipada => {
            if dias_diferencia < 9 {
                let tiene_nota = observaciones.map(|o| !o.trim().is_empty()).unwrap_or(false);
                if !tiene_nota {
                    return Err(ReglaError::AnticipadaSinObservaciones);
                }
                return Ok(Cancelacion {
                    monto_devuelto_centavos: 0,
                    pendiente_revision_junta: true,
                });
            }
            let devuelto = devolucion_solicitada.unwrap_or(monto_abonado_centavos);
            if devuelto < 0 {
                return Err(ReglaError::DevolucionNegativa);
            }
            Ok(Cancelacion {
                monto_devuelto_centavos: devuelto.min(monto_abonado_centavos),
                pendiente_revision_junta: false,
            })
        }
        Motivo::Otro => Ok(Cancelacion {
            monto_devuelto_centavos: 0,
            pendiente_revision_junta: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn catalogo() -> Vec<SuplementoPrecio> {
        vec![
            SuplementoPrecio {
                id_suplemento: 1,
                precio_centavos: 500, // sillas, por unidad
                tipo: TipoSuplemento::PorHora,
            },
            SuplementoPrecio {
                id_suplemento: 2,
                precio_centavos: 2000, // limpieza, fijo
                tipo: TipoSuplemento::Fijo,
            },
        ]
    }

    fn linea(id: i32, cantidad: i32) -> LineaSuplemento {
        LineaSuplemento {
            id_suplemento: id,
            cantidad,
        }
    }

    fn dia(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // SALON 100.00 + sillas 5.00 x 3 = 115.00
    #[test]
    fn precio_servicio_mas_por_unidad() {
        let total = precio_reserva(10_000, &[linea(1, 3)], &catalogo()).unwrap();
        assert_eq!(total, 11_500);
    }

    #[test]
    fn suplemento_fijo_cuenta_una_vez() {
        // el fijo repetido agrupa cantidades pero sigue aportando su precio una vez
        let total = precio_reserva(10_000, &[linea(2, 1), linea(2, 4)], &catalogo()).unwrap();
        assert_eq!(total, 12_000);
    }

    #[test]
    fn lineas_repetidas_por_unidad_suman_cantidades() {
        let total = precio_reserva(10_000, &[linea(1, 2), linea(1, 1)], &catalogo()).unwrap();
        assert_eq!(total, 11_500);
    }

    #[test]
    fn sin_suplementos_es_el_precio_plano() {
        assert_eq!(precio_reserva(10_000, &[], &catalogo()).unwrap(), 10_000);
    }

    #[test]
    fn suplemento_desconocido_es_error() {
        let err = precio_reserva(10_000, &[linea(99, 1)], &catalogo()).unwrap_err();
        assert_eq!(err, ReglaError::SuplementoNoEncontrado(99));
    }

    #[test]
    fn cantidad_cero_es_error() {
        let err = precio_reserva(10_000, &[linea(1, 0)], &catalogo()).unwrap_err();
        assert_eq!(err, ReglaError::CantidadInvalida(1));
    }

    #[rstest]
    #[case(11_500, 5_000, 6_500, true)]
    #[case(11_500, 0, 11_500, true)]
    #[case(11_500, 5_000, 6_499, false)]
    #[case(11_500, 5_000, 11_500, false)]
    fn liquidacion_exige_pendiente_exacto(
        #[case] precio: i64,
        #[case] abonado: i64,
        #[case] monto: i64,
        #[case] ok: bool,
    ) {
        assert_eq!(validar_liquidacion(precio, abonado, monto).is_ok(), ok);
    }

    #[test]
    fn clima_mismo_dia_devuelve_todo() {
        let hoy = dia(2026, 8, 23);
        let c = evaluar_cancelacion(Motivo::Clima, hoy, hoy, 5_000, None, None).unwrap();
        assert_eq!(c.monto_devuelto_centavos, 5_000);
        assert!(!c.pendiente_revision_junta);
    }

    #[test]
    fn clima_otro_dia_se_rechaza() {
        let err = evaluar_cancelacion(
            Motivo::Clima,
            dia(2026, 8, 25),
            dia(2026, 8, 23),
            5_000,
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err, ReglaError::ClimaFueraDeDia);
    }

    #[rstest]
    #[case(0)]
    #[case(4)]
    #[case(8)]
    fn anticipada_bajo_nueve_dias_va_a_junta_sin_devolucion(#[case] dias: i64) {
        let hoy = dia(2026, 8, 1);
        let c = evaluar_cancelacion(
            Motivo::Anticipada,
            hoy + chrono::Duration::days(dias),
            hoy,
            5_000,
            Some(5_000), // lo solicitado se ignora
            Some("el socio avisó por teléfono"),
        )
        .unwrap();
        assert_eq!(c.monto_devuelto_centavos, 0);
        assert!(c.pendiente_revision_junta);
    }

    #[test]
    fn anticipada_bajo_nueve_dias_sin_nota_se_rechaza() {
        let hoy = dia(2026, 8, 1);
        let err = evaluar_cancelacion(
            Motivo::Anticipada,
            dia(2026, 8, 5),
            hoy,
            5_000,
            None,
            Some("   "),
        )
        .unwrap_err();
        assert_eq!(err, ReglaError::AnticipadaSinObservaciones);
    }

    #[rstest]
    #[case(None, 5_000)]
    #[case(Some(2_000), 2_000)]
    #[case(Some(0), 0)]
    #[case(Some(6_000), 5_000)] // lo solicitado se recorta a lo abonado
    fn anticipada_nueve_dias_o_mas_devuelve_con_tope(
        #[case] solicitado: Option<i64>,
        #[case] esperado: i64,
    ) {
        let hoy = dia(2026, 8, 1);
        let c = evaluar_cancelacion(
            Motivo::Anticipada,
            dia(2026, 8, 10), // exactamente 9 días
            hoy,
            5_000,
            solicitado,
            None,
        )
        .unwrap();
        assert_eq!(c.monto_devuelto_centavos, esperado);
        assert!(!c.pendiente_revision_junta);
    }

    #[test]
    fn anticipada_devolucion_negativa_se_rechaza() {
        let hoy = dia(2026, 8, 1);
        let err = evaluar_cancelacion(
            Motivo::Anticipada,
            dia(2026, 8, 20),
            hoy,
            5_000,
            Some(-100),
            None,
        )
        .unwrap_err();
        assert_eq!(err, ReglaError::DevolucionNegativa);
    }

    #[test]
    fn alta_con_conflicto_fuerza_lista_de_espera_sin_pago() {
        let alta = resolver_alta(true, 5_000, Some("efectivo".to_string()));
        assert_eq!(alta.estado, Estado::ListaEspera);
        assert_eq!(alta.anticipo_centavos, 0);
        assert_eq!(alta.metodo_pago, None);
    }

    #[test]
    fn alta_con_conflicto_descarta_incluso_pago_invalido() {
        // con conflicto los campos de pago se anulan aunque vinieran mal
        let alta = resolver_alta(true, -500, None);
        assert_eq!(alta.estado, Estado::ListaEspera);
        assert_eq!(alta.anticipo_centavos, 0);
        assert_eq!(alta.metodo_pago, None);
    }

    #[test]
    fn alta_sin_conflicto_conserva_el_anticipo() {
        let alta = resolver_alta(false, 5_000, Some("tarjeta".to_string()));
        assert_eq!(alta.estado, Estado::Pendiente);
        assert_eq!(alta.anticipo_centavos, 5_000);
        assert_eq!(alta.metodo_pago.as_deref(), Some("tarjeta"));
    }

    #[test]
    fn otro_no_devuelve_nada() {
        let hoy = dia(2026, 8, 1);
        let c = evaluar_cancelacion(Motivo::Otro, dia(2026, 8, 2), hoy, 5_000, Some(5_000), None)
            .unwrap();
        assert_eq!(c.monto_devuelto_centavos, 0);
        assert!(!c.pendiente_revision_junta);
    }

    #[test]
    fn estados_abiertos() {
        assert!(Estado::Pendiente.es_abierta());
        assert!(Estado::Confirmada.es_abierta());
        assert!(Estado::ListaEspera.es_abierta());
        assert!(!Estado::Cancelada.es_abierta());
        assert!(!Estado::Completada.es_abierta());
    }

    #[test]
    fn estado_parse_y_as_str() {
        for e in [
            Estado::Pendiente,
            Estado::Confirmada,
            Estado::Cancelada,
            Estado::Completada,
            Estado::ListaEspera,
        ] {
            assert_eq!(Estado::parse(e.as_str()), Some(e));
        }
        assert_eq!(Estado::parse("OCUPADA"), None);
    }
}
