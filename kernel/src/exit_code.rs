// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The result a kernel finishes with, reported to its principal on commit.

/// Exit codes a kernel can commit with.
///
/// Naming and ordering match the predecessor runtime's `exit_code` table
/// exactly, since peers on a mixed-version network (or operators reading
/// logs against historical documentation) rely on the string form being
/// stable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(any(test, feature = "bolero"), derive(bolero::TypeGenerator))]
pub enum ExitCode {
    Success,
    #[default]
    Undefined,
    Error,
    EndpointNotConnected,
    NoPrincipalFound,
    NoUpstreamServersAvailable,
}

impl ExitCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ExitCode::Success => "success",
            ExitCode::Undefined => "undefined",
            ExitCode::Error => "error",
            ExitCode::EndpointNotConnected => "endpoint_not_connected",
            ExitCode::NoPrincipalFound => "no_principal_found",
            ExitCode::NoUpstreamServersAvailable => "no_upstream_servers_available",
        }
    }

    #[must_use]
    pub const fn from_wire(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => ExitCode::Success,
            1 => ExitCode::Undefined,
            2 => ExitCode::Error,
            3 => ExitCode::EndpointNotConnected,
            4 => ExitCode::NoPrincipalFound,
            5 => ExitCode::NoUpstreamServersAvailable,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn to_wire(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn names_match_predecessor_runtime() {
        assert_eq!(ExitCode::Success.as_str(), "success");
        assert_eq!(ExitCode::Undefined.as_str(), "undefined");
        assert_eq!(ExitCode::Error.as_str(), "error");
        assert_eq!(
            ExitCode::EndpointNotConnected.as_str(),
            "endpoint_not_connected"
        );
        assert_eq!(ExitCode::NoPrincipalFound.as_str(), "no_principal_found");
        assert_eq!(
            ExitCode::NoUpstreamServersAvailable.as_str(),
            "no_upstream_servers_available"
        );
    }

    #[test]
    fn wire_round_trip() {
        bolero::check!().with_type().for_each(|x: &ExitCode| {
            assert_eq!(ExitCode::from_wire(x.to_wire()), Some(*x));
        });
    }
}
