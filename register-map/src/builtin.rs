//! Compiled-in register maps.

use crate::{Derivation, DerivedField, Encoding, FieldDescriptor, MapError, RegisterMap};

/// Basic inverter telemetry: thirteen consecutive single-register values
/// starting at holding register 0.
pub fn inverter_basic() -> Result<RegisterMap, MapError> {
    let u16_field = |name: &str, address: u16| FieldDescriptor::new(name, address, Encoding::UInt16);
    RegisterMap::new(
        "inverter-basic",
        vec![
            // 0: disconnected, 1: connected
            u16_field("connection_status", 0),
            // 0: fault, 1: running
            u16_field("device_status", 1),
            u16_field("error_code", 2),
            u16_field("active_power", 3).unit("kW").scale(0.01),
            u16_field("reactive_power", 4).unit("kVAr").scale(0.01),
            u16_field("power_factor", 5).scale(0.01),
            u16_field("frequency", 6).unit("Hz").scale(0.1),
            u16_field("voltage", 7).unit("V").scale(0.1),
            u16_field("current", 8).unit("A").scale(0.1),
            u16_field("temperature", 9).unit("°C").scale(0.1),
            u16_field("daily_energy", 10).unit("kWh").scale(0.1),
            u16_field("total_energy", 11).unit("kWh").scale(0.1),
            u16_field("efficiency", 12).unit("%").scale(0.01),
        ],
        vec![],
    )
}

/// Schneider PM2120 power meter.
///
/// Addresses are the register numbers of the PM2xxx register list minus one.
/// Values are returned in device units: energy counters are `Wh`, `VARh` and
/// `VAh`, use a scale override to get `kWh`. The neutral current channel
/// (register 3006) is not fitted on every variant and is left out.
pub fn pm2120() -> Result<RegisterMap, MapError> {
    let f32_field = |name: &str, address: u16, unit: &str| {
        FieldDescriptor::new(name, address, Encoding::Float32).unit(unit)
    };
    let i64_field = |name: &str, address: u16, unit: &str| {
        FieldDescriptor::new(name, address, Encoding::Int64).unit(unit)
    };
    // The device encodes power factor as 4Q_FP_PF. Decoded as plain f32
    // until verified against hardware.
    let pf_field = |name: &str, address: u16| FieldDescriptor::new(name, address, Encoding::Float32);

    RegisterMap::new(
        "PM2120",
        vec![
            f32_field("current_a", 2999, "A"),
            f32_field("current_b", 3001, "A"),
            f32_field("current_c", 3003, "A"),
            f32_field("current_avg", 3009, "A"),
            f32_field("voltage_ab", 3019, "V"),
            f32_field("voltage_bc", 3021, "V"),
            f32_field("voltage_ca", 3023, "V"),
            f32_field("voltage_ll_avg", 3025, "V"),
            f32_field("voltage_an", 3027, "V"),
            f32_field("voltage_bn", 3029, "V"),
            f32_field("voltage_cn", 3031, "V"),
            f32_field("voltage_ln_avg", 3035, "V"),
            f32_field("active_power_a", 3053, "kW"),
            f32_field("active_power_b", 3055, "kW"),
            f32_field("active_power_c", 3057, "kW"),
            f32_field("active_power_total", 3059, "kW"),
            f32_field("reactive_power_a", 3061, "kVAr"),
            f32_field("reactive_power_b", 3063, "kVAr"),
            f32_field("reactive_power_c", 3065, "kVAr"),
            f32_field("reactive_power_total", 3067, "kVAr"),
            f32_field("apparent_power_a", 3069, "kVA"),
            f32_field("apparent_power_b", 3071, "kVA"),
            f32_field("apparent_power_c", 3073, "kVA"),
            f32_field("apparent_power_total", 3075, "kVA"),
            pf_field("power_factor_a", 3077),
            pf_field("power_factor_b", 3079),
            pf_field("power_factor_c", 3081),
            pf_field("power_factor_total", 3083),
            f32_field("frequency", 3109, "Hz"),
            i64_field("active_energy_delivered_wh", 3203, "Wh"),
            i64_field("active_energy_received_wh", 3207, "Wh"),
            i64_field("reactive_energy_delivered_varh", 3219, "VARh"),
            i64_field("reactive_energy_received_varh", 3223, "VARh"),
            i64_field("apparent_energy_delivered_vah", 3235, "VAh"),
            i64_field("apparent_energy_received_vah", 3239, "VAh"),
            f32_field("thd_current_a_percent", 21299, "%"),
            f32_field("thd_current_b_percent", 21301, "%"),
            f32_field("thd_current_c_percent", 21303, "%"),
            f32_field("thd_voltage_ab_percent", 21321, "%"),
            f32_field("thd_voltage_bc_percent", 21323, "%"),
            f32_field("thd_voltage_ca_percent", 21325, "%"),
            f32_field("thd_voltage_an_percent", 21329, "%"),
            f32_field("thd_voltage_bn_percent", 21331, "%"),
            f32_field("thd_voltage_cn_percent", 21333, "%"),
        ],
        vec![
            DerivedField::new(
                "voltage_ll_mean",
                Derivation::Mean,
                &["voltage_ab", "voltage_bc", "voltage_ca"],
            )
            .unit("V"),
            DerivedField::new(
                "voltage_ln_mean",
                Derivation::Mean,
                &["voltage_an", "voltage_bn", "voltage_cn"],
            )
            .unit("V"),
            DerivedField::new(
                "active_energy_net_wh",
                Derivation::Difference,
                &["active_energy_delivered_wh", "active_energy_received_wh"],
            )
            .unit("Wh"),
        ],
    )
}
