//! Constants for the LSAT wire format.

/// The authentication scheme used in `WWW-Authenticate` and `Authorization` headers.
pub const LSAT_SCHEME: &str = "LSAT";

/// Header carrying the payment challenge on a 402 response.
pub const WWW_AUTHENTICATE_HEADER: &str = "WWW-Authenticate";

/// Header carrying the presented token on subsequent requests.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Size in bytes of a payment hash.
pub const PAYMENT_HASH_SIZE: usize = 32;

/// Size in bytes of a token id.
pub const TOKEN_ID_SIZE: usize = 32;

/// Length of a hex-encoded payment preimage.
pub const PREIMAGE_HEX_LENGTH: usize = 64;

/// Total encoded length of a version 0 identifier (tag + hash + id).
pub const IDENTIFIER_V0_LENGTH: usize = 2 + PAYMENT_HASH_SIZE + TOKEN_ID_SIZE;

/// Caveat condition for expiration timestamps (milliseconds since the epoch).
pub const EXPIRATION_CONDITION: &str = "expiration";

/// Caveat condition binding a token to a client IP address.
pub const ORIGIN_CONDITION: &str = "ip";

/// Caveat condition binding a token to a request path.
pub const ROUTE_CONDITION: &str = "route";

/// Caveat condition binding a token to a node-signed challenge.
pub const CHALLENGE_CONDITION: &str = "challenge";

/// Default macaroon location.
pub const DEFAULT_LOCATION: &str = "lsat";

/// Header carrying the client address chain when behind a proxy.
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

/// Label the discharge signing key is derived from the root key with.
pub const DISCHARGE_KEY_LABEL: &str = "lsat-discharge";
