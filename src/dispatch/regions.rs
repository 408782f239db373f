//! Human-readable region names to platform region codes

const REGIONS: &[(&str, &str)] = &[
    ("US East (N. Virginia)", "us-east-1"),
    ("United States (N. Virginia)", "us-east-1"),
    ("US East (Ohio)", "us-east-2"),
    ("United States (Ohio)", "us-east-2"),
    ("US West (N. California)", "us-west-1"),
    ("United States (N. California)", "us-west-1"),
    ("US West (Oregon)", "us-west-2"),
    ("United States (Oregon)", "us-west-2"),
    ("Africa (Cape Town)", "af-south-1"),
    ("Asia Pacific (Hong Kong)", "ap-east-1"),
    ("Asia Pacific (Mumbai)", "ap-south-1"),
    ("Asia Pacific (Osaka)", "ap-northeast-3"),
    ("Asia Pacific (Seoul)", "ap-northeast-2"),
    ("Asia Pacific (Singapore)", "ap-southeast-1"),
    ("Asia Pacific (Sydney)", "ap-southeast-2"),
    ("Asia Pacific (Tokyo)", "ap-northeast-1"),
    ("Canada (Central)", "ca-central-1"),
    ("Europe (Frankfurt)", "eu-central-1"),
    ("Europe (Ireland)", "eu-west-1"),
    ("Europe (London)", "eu-west-2"),
    ("Europe (Milan)", "eu-south-1"),
    ("Europe (Paris)", "eu-west-3"),
    ("Europe (Stockholm)", "eu-north-1"),
    ("Middle East (Bahrain)", "me-south-1"),
    ("South America (São Paulo)", "sa-east-1"),
    ("South America (Sao Paulo)", "sa-east-1"),
];

/// Translate a region name to its code. Codes pass through unchanged.
pub fn region_code(name: &str) -> Option<&'static str> {
    let name = name.trim();
    REGIONS
        .iter()
        .find(|(human, code)| human.eq_ignore_ascii_case(name) || code.eq_ignore_ascii_case(name))
        .map(|(_, code)| *code)
}
