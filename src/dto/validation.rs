//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates that a string parses as a UUID-shaped scope identifier.
pub fn validate_scope_id(id: &str) -> Result<(), ValidationError> {
    if uuid::Uuid::parse_str(id).is_err() {
        let mut err = ValidationError::new("scope_id_format");
        err.message = Some(format!("`{id}` is not a valid match identifier").into());
        return Err(err);
    }
    Ok(())
}

/// Validates that a move reads like standard algebraic notation.
///
/// Structural only: length and character set. Whether the move is legal in
/// the current position is the rule engine's call.
///
/// # Examples
///
/// ```ignore
/// validate_san("e4")      // Ok
/// validate_san("Nxf7+")   // Ok
/// validate_san("O-O-O")   // Ok
/// validate_san("")        // Err - empty
/// validate_san("e4!?")    // Err - annotation glyphs
/// ```
pub fn validate_san(san: &str) -> Result<(), ValidationError> {
    if san.len() < 2 || san.len() > 10 {
        let mut err = ValidationError::new("san_length");
        err.message = Some(format!("move must be 2-10 characters (got {})", san.len()).into());
        return Err(err);
    }

    let valid = san.chars().all(|c| {
        ('a'..='h').contains(&c)
            || c.is_ascii_digit()
            || matches!(c, 'K' | 'Q' | 'R' | 'B' | 'N' | 'O' | 'x' | '+' | '#' | '=' | '-')
    });
    if !valid {
        let mut err = ValidationError::new("san_format");
        err.message = Some("move contains characters outside algebraic notation".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a position is structurally FEN-shaped: six fields, eight
/// ranks, a recognizable side to move.
pub fn validate_fen(fen: &str) -> Result<(), ValidationError> {
    let fields: Vec<&str> = fen.split_ascii_whitespace().collect();
    let shaped = fields.len() == 6
        && fields[0].split('/').count() == 8
        && matches!(fields[1], "w" | "b");
    if !shaped {
        let mut err = ValidationError::new("fen_format");
        err.message = Some("position is not a structurally valid FEN".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_san_accepts_common_moves() {
        for san in ["e4", "Nf3", "Nxf7+", "O-O", "O-O-O", "e8=Q#", "Rad1"] {
            assert!(validate_san(san).is_ok(), "rejected `{san}`");
        }
    }

    #[test]
    fn test_validate_san_rejects_junk() {
        assert!(validate_san("").is_err());
        assert!(validate_san("e").is_err());
        assert!(validate_san("e4!?").is_err());
        assert!(validate_san("this is not a move").is_err());
    }

    #[test]
    fn test_validate_fen_shape() {
        assert!(
            validate_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").is_ok()
        );
        assert!(validate_fen("not a position").is_err());
        assert!(validate_fen("rnbqkbnr/pppppppp/8/8 w KQkq - 0 1").is_err());
    }

    #[test]
    fn test_validate_scope_id() {
        assert!(validate_scope_id("0193f1f0-7d46-7c52-a6b1-2e64704442a5").is_ok());
        assert!(validate_scope_id("game-42").is_err());
        assert!(validate_scope_id("").is_err());
    }
}
