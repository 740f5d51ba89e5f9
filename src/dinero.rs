//! Montos en centavos (i64), sin floats.

/// Convierte centavos (i64) -> "123.45"
pub fn centavos_a_str(centavos: i64) -> String {
    let sign = if centavos < 0 { "-" } else { "" };
    let c = centavos.abs();
    let entero = c / 100;
    let dec = c % 100;
    format!("{sign}{entero}.{dec:02}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "0.00")]
    #[case(5, "0.05")]
    #[case(11500, "115.00")]
    #[case(10099, "100.99")]
    #[case(-250, "-2.50")]
    fn formatea_centavos(#[case] centavos: i64, #[case] esperado: &str) {
        assert_eq!(centavos_a_str(centavos), esperado);
    }
}
