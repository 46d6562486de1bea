//! Static parameter field table

/// One measured parameter: where it lives in the row and its validity limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterField {
    pub name: &'static str,
    pub column: &'static str,
    pub lower_limit: f64,
    pub upper_limit: f64,
}

const fn field(name: &'static str, column: &'static str, lower: f64, upper: f64) -> ParameterField {
    ParameterField {
        name,
        column,
        lower_limit: lower,
        upper_limit: upper,
    }
}

/// Emission order is table order.
pub const PARAMETER_FIELDS: [ParameterField; 10] = [
    field("Reserve", "Reserve", 237.7, 242.3),
    field("3/4", "3_4", 105.5, 108.5),
    field("1/4", "1_4", 213.7, 218.3),
    field("Empty", "Name11Value", 267.7, 272.3),
    field("1/2", "1_2", 159.2, 162.8),
    field("True_Empty", "True_Empty", 287.7, 292.3),
    field("空载电流", "Current", 0.3, 1.9),
    field("泄露", "Supply_Leak", -0.14, 0.35),
    field("True_Full", "True_Full", 50.5, 53.5),
    field("Full", "Full", 68.5, 71.5),
];
