//! Result codes and the common result envelope

use std::fmt;

macro_rules! result_codes {
    ($($variant:ident = $code:literal => $name:literal,)*) => {
        /// Server result code
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ResultCode {
            $($variant,)*
            /// Any code outside the known catalogue
            Unknown(u32),
        }

        impl ResultCode {
            pub fn code(self) -> u32 {
                match self {
                    $(ResultCode::$variant => $code,)*
                    ResultCode::Unknown(code) => code,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(ResultCode::$variant => $name,)*
                    ResultCode::Unknown(_) => "unknown",
                }
            }
        }

        impl From<u32> for ResultCode {
            fn from(code: u32) -> Self {
                match code {
                    $($code => ResultCode::$variant,)*
                    other => ResultCode::Unknown(other),
                }
            }
        }
    };
}

result_codes! {
    Success = 0 => "success",
    OperationsError = 1 => "operationsError",
    ProtocolError = 2 => "protocolError",
    TimeLimitExceeded = 3 => "timeLimitExceeded",
    SizeLimitExceeded = 4 => "sizeLimitExceeded",
    CompareFalse = 5 => "compareFalse",
    CompareTrue = 6 => "compareTrue",
    AuthMethodNotSupported = 7 => "authMethodNotSupported",
    StrongerAuthRequired = 8 => "strongerAuthRequired",
    Referral = 10 => "referral",
    AdminLimitExceeded = 11 => "adminLimitExceeded",
    UnavailableCriticalExtension = 12 => "unavailableCriticalExtension",
    ConfidentialityRequired = 13 => "confidentialityRequired",
    SaslBindInProgress = 14 => "saslBindInProgress",
    NoSuchAttribute = 16 => "noSuchAttribute",
    UndefinedAttributeType = 17 => "undefinedAttributeType",
    InappropriateMatching = 18 => "inappropriateMatching",
    ConstraintViolation = 19 => "constraintViolation",
    AttributeOrValueExists = 20 => "attributeOrValueExists",
    InvalidAttributeSyntax = 21 => "invalidAttributeSyntax",
    NoSuchObject = 32 => "noSuchObject",
    AliasProblem = 33 => "aliasProblem",
    InvalidDnSyntax = 34 => "invalidDNSyntax",
    AliasDereferencingProblem = 36 => "aliasDereferencingProblem",
    InappropriateAuthentication = 48 => "inappropriateAuthentication",
    InvalidCredentials = 49 => "invalidCredentials",
    InsufficientAccessRights = 50 => "insufficientAccessRights",
    Busy = 51 => "busy",
    Unavailable = 52 => "unavailable",
    UnwillingToPerform = 53 => "unwillingToPerform",
    LoopDetect = 54 => "loopDetect",
    NamingViolation = 64 => "namingViolation",
    ObjectClassViolation = 65 => "objectClassViolation",
    NotAllowedOnNonLeaf = 66 => "notAllowedOnNonLeaf",
    NotAllowedOnRdn = 67 => "notAllowedOnRDN",
    EntryAlreadyExists = 68 => "entryAlreadyExists",
    ObjectClassModsProhibited = 69 => "objectClassModsProhibited",
    AffectsMultipleDsas = 71 => "affectsMultipleDSAs",
    Other = 80 => "other",
    Canceled = 118 => "canceled",
    NoSuchOperation = 119 => "noSuchOperation",
    TooLate = 120 => "tooLate",
    CannotCancel = 121 => "cannotCancel",
}

impl ResultCode {
    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

impl From<ResultCode> for u32 {
    fn from(code: ResultCode) -> Self {
        code.code()
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Result envelope shared by every response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapResult {
    pub code: ResultCode,
    pub matched_dn: String,
    pub diagnostic: String,
    pub referrals: Vec<String>,
}

impl LdapResult {
    pub fn new(code: ResultCode) -> Self {
        Self {
            code,
            matched_dn: String::new(),
            diagnostic: String::new(),
            referrals: Vec::new(),
        }
    }

    pub fn success() -> Self {
        Self::new(ResultCode::Success)
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = diagnostic.into();
        self
    }
}
